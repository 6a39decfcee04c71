//! Replays source journal entries as historical updates on the created request.

use casemig_remote::{EntityRecord, Fields};
use casemig_source::JournalEntry;
use tracing::{debug, warn};

use crate::context::MigrationContext;

pub const HISTORY_ENTITY: &str = "RequestHistoricUpdates";

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn historic_update_fields(target_ref: &str, index: usize, entry: &JournalEntry) -> Fields {
    let mut fields = Fields::new();
    fields.insert("h_fk_reference".into(), target_ref.to_string());
    fields.insert("h_updatedate".into(), entry.created_on.clone());
    fields.insert("h_updatebytype".into(), "1".into());
    fields.insert("h_updateindex".into(), index.to_string());
    fields.insert("h_updateby".into(), entry.created_by.clone());
    fields.insert("h_updatebyname".into(), entry.created_by.clone());
    if !entry.element.is_empty() {
        fields.insert(
            "h_actionsource".into(),
            format!("{} ({})", entry.element, entry.created_by),
        );
    }
    if !entry.value.is_empty() {
        fields.insert("h_description".into(), escape_html(&entry.value));
    }
    fields
}

/// Add one historical update per journal entry, oldest first. Returns how many were written.
pub async fn apply_historical_updates(ctx: &MigrationContext, target_ref: &str, source_guid: &str) -> usize {
    if source_guid.is_empty() {
        return 0;
    }
    let entries = match ctx.source.journal(source_guid).await {
        Ok(entries) => entries,
        Err(err) => {
            warn!(target_ref, source_guid, error = %err, "unable to read journal entries");
            return 0;
        }
    };

    let mut applied = 0;
    for (offset, entry) in entries.iter().enumerate() {
        let record = EntityRecord {
            primary: historic_update_fields(target_ref, offset + 1, entry),
            related: Vec::new(),
        };
        match ctx.remote.create(HISTORY_ENTITY, &record).await {
            Ok(_) => applied += 1,
            Err(err) => warn!(target_ref, index = offset + 1, error = %err, "unable to add historical update"),
        }
    }
    debug!(target_ref, applied, "historical updates applied");
    applied
}
