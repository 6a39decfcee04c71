//! Primary record import: one pass per request class.

use std::sync::Arc;

use casemig_core::{
    CorrelationEntry, FieldMapping, RequestClass, RequestStatus, SourceRow, PARENT_KEY_COLUMN,
    SOURCE_GUID_COLUMN, SOURCE_KEY_COLUMN,
};
use casemig_remote::{EntityRecord, Fields, RelatedRecord};
use casemig_source::assemble_statement;
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::{translate, RequestClassConfig};
use crate::context::MigrationContext;
use crate::history::apply_historical_updates;
use crate::pool::WorkerPool;
use crate::resolver::CategoryGroup;

pub const REQUEST_ENTITY: &str = "Requests";
const IMPORT_ACTIVITY: &str = "Request imported from ServiceNow";
const DEFAULT_HOLD_REASON: &str =
    "Request imported from ServiceNow in an On Hold status. See Historical Request Updates for further information.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClassImportState {
    Idle,
    Querying,
    Importing,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateRule {
    Resolved,
    /// Carried for resolved, closed and on-hold records; doubles as the hold-until time.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldStrategy {
    PlainCopy,
    AnalystLookup,
    CustomerLookup,
    PriorityLookup,
    CategoryLookup(CategoryGroup),
    ServiceLookup,
    StatusLookup,
    TeamLookup,
    SiteLookup,
    DateConditional(DateRule),
    HoldReason,
    /// Written by a follow-up update once the record exists.
    Deferred,
    /// Filled in alongside another field; a mapping for it is ignored.
    Derived,
}

pub fn strategy_for(field: &str) -> FieldStrategy {
    match field {
        "h_ownerid" => FieldStrategy::AnalystLookup,
        "h_fk_user_id" => FieldStrategy::CustomerLookup,
        "h_fk_priorityid" => FieldStrategy::PriorityLookup,
        "h_category_id" => FieldStrategy::CategoryLookup(CategoryGroup::Request),
        "h_closure_category_id" => FieldStrategy::CategoryLookup(CategoryGroup::Closure),
        "h_fk_serviceid" => FieldStrategy::ServiceLookup,
        "h_status" => FieldStrategy::StatusLookup,
        "h_fk_team_id" => FieldStrategy::TeamLookup,
        "h_site_id" => FieldStrategy::SiteLookup,
        "h_dateresolved" => FieldStrategy::DateConditional(DateRule::Resolved),
        "h_dateclosed" => FieldStrategy::DateConditional(DateRule::Closed),
        "h_onhold_reason" => FieldStrategy::HoldReason,
        "h_datelogged" | "h_createdby" => FieldStrategy::Deferred,
        "h_requesttype" | "h_request_prefix" | "h_category" | "h_closure_category"
        | "h_fk_servicename" | "h_fk_team_name" | "h_site" | "h_fk_priorityname" | "h_ownername"
        | "h_fk_user_name" => FieldStrategy::Derived,
        _ => FieldStrategy::PlainCopy,
    }
}

/// Lookups that fall back to a class default even when the field is not mapped.
const DEFAULTED_FIELDS: [&str; 4] = ["h_fk_priorityid", "h_fk_team_id", "h_fk_serviceid", "h_site_id"];

#[derive(Debug, Clone, Serialize)]
pub struct ClassReport {
    pub class: RequestClass,
    pub state: ClassImportState,
    pub rows: usize,
    pub imported: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordDraft {
    pub source_key: String,
    pub record: EntityRecord,
    pub status: RequestStatus,
    pub workflow: Option<String>,
    pub hold_until: Option<String>,
    pub hold_reason: Option<String>,
    pub deferred: Fields,
    pub parent_key: String,
    pub source_guid: String,
}

impl RecordDraft {
    fn set(&mut self, field: &str, value: impl Into<String>) {
        self.record.primary.insert(field.to_string(), value.into());
    }
}

/// `h_custom_a` style columns map to `h_custom_1` on the extended record.
pub fn extended_column_name(field: &str) -> Option<String> {
    let suffix = field.strip_prefix("h_custom_")?;
    if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
        return Some(field.to_string());
    }
    let mut chars = suffix.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), None) if letter.is_ascii_alphabetic() => {
            let position = letter.to_ascii_lowercase() as u32 - 'a' as u32 + 1;
            Some(format!("h_custom_{position}"))
        }
        _ => None,
    }
}

pub async fn request_prefix(ctx: &MigrationContext, class: RequestClass) -> String {
    match ctx.remote.app_setting(class.prefix_setting()).await {
        Ok(Some(prefix)) => prefix,
        Ok(None) => {
            warn!(class = %class, default = class.default_prefix(), "request prefix setting is empty; using default");
            class.default_prefix().to_string()
        }
        Err(err) => {
            warn!(class = %class, default = class.default_prefix(), error = %err, "could not read request prefix; using default");
            class.default_prefix().to_string()
        }
    }
}

/// Import every source row of `class`. Rows are independent: a failing row is skipped.
pub async fn import_class(ctx: &Arc<MigrationContext>, class: RequestClass) -> ClassReport {
    let span = info_span!("primary_import", run_id = %ctx.run_id, class = %class);
    run_class(ctx, class).instrument(span).await
}

async fn run_class(ctx: &Arc<MigrationContext>, class: RequestClass) -> ClassReport {
    let before = ctx.counters.snapshot().await;
    let mut report = ClassReport {
        class,
        state: ClassImportState::Idle,
        rows: 0,
        imported: 0,
        skipped: 0,
    };

    report.state = ClassImportState::Querying;
    let statement = assemble_statement(&ctx.config.class(class).sql_statement);
    if statement.is_empty() {
        error!("no extraction statement configured");
        report.state = ClassImportState::Failed;
        return report;
    }
    let rows = match ctx.source.extract(&statement).await {
        Ok(rows) => rows,
        Err(err) => {
            error!(error = %err, "source query failed");
            report.state = ClassImportState::Failed;
            return report;
        }
    };
    report.rows = rows.len();

    let prefix = request_prefix(ctx, class).await;
    info!(rows = rows.len(), prefix = %prefix, "importing records");

    report.state = ClassImportState::Importing;
    let mut pool = WorkerPool::new("primary", ctx.concurrency());
    for row in rows {
        let ctx = Arc::clone(ctx);
        let prefix = prefix.clone();
        pool.spawn(async move {
            import_row(&ctx, class, &prefix, row).await;
        })
        .await;
    }
    let panicked = pool.finish().await;
    for _ in 0..panicked {
        ctx.counters.record_skipped().await;
    }

    let after = ctx.counters.snapshot().await;
    report.imported = after.created.saturating_sub(before.created);
    report.skipped = after.skipped.saturating_sub(before.skipped);
    report.state = ClassImportState::Done;
    info!(imported = report.imported, skipped = report.skipped, "class import complete");
    report
}

async fn import_row(ctx: &MigrationContext, class: RequestClass, prefix: &str, row: SourceRow) {
    let draft = build_record(ctx, class, prefix, &row).await;
    let source_key = draft.source_key.as_str();

    if ctx.dry_run() {
        match serde_json::to_string_pretty(&draft) {
            Ok(payload) => info!(source_key, "dry run, request not created:\n{payload}"),
            Err(err) => warn!(source_key, error = %err, "dry run payload could not be rendered"),
        }
        ctx.counters.record_skipped().await;
        return;
    }

    let reference = match ctx.remote.create(REQUEST_ENTITY, &draft.record).await {
        Ok(Some(reference)) => reference,
        Ok(None) => {
            warn!(source_key, "create returned no request reference");
            ctx.counters.record_skipped().await;
            return;
        }
        Err(err) => {
            warn!(source_key, error = %err, "unable to create request");
            ctx.counters.record_skipped().await;
            return;
        }
    };

    if source_key.is_empty() {
        warn!(target_ref = %reference, "source row has no key; it cannot be correlated");
    } else {
        let entry = CorrelationEntry {
            target_ref: reference.clone(),
            parent_key: draft.parent_key.clone(),
            source_guid: draft.source_guid.clone(),
        };
        ctx.correlation.insert(source_key, entry).await;
    }
    ctx.counters.record_created().await;
    info!(source_key, target_ref = %reference, "request created");

    after_create(ctx, &draft, &reference).await;
    apply_historical_updates(ctx, &reference, &draft.source_guid).await;
}

pub async fn build_record(
    ctx: &MigrationContext,
    class: RequestClass,
    prefix: &str,
    row: &SourceRow,
) -> RecordDraft {
    let conf = ctx.config.class(class);
    let status = conf
        .mapping("h_status")
        .map(|mapping| mapping.resolve(row))
        .and_then(|value| translate(&conf.status_mapping, &value).map(RequestStatus::from_token))
        .unwrap_or_else(|| RequestStatus::Other(String::new()));

    let mut draft = RecordDraft {
        source_key: row.text_or_empty(SOURCE_KEY_COLUMN),
        record: EntityRecord::default(),
        status,
        workflow: None,
        hold_until: None,
        hold_reason: None,
        deferred: Fields::new(),
        parent_key: row.text_or_empty(PARENT_KEY_COLUMN),
        source_guid: row.text_or_empty(SOURCE_GUID_COLUMN),
    };

    let unmapped = FieldMapping::default();
    let mut fields: Vec<(&str, &FieldMapping)> = conf
        .core_field_mapping
        .iter()
        .map(|(field, mapping)| (field.as_str(), mapping))
        .collect();
    for field in DEFAULTED_FIELDS {
        if !conf.core_field_mapping.contains_key(field) {
            fields.push((field, &unmapped));
        }
    }

    for (field, mapping) in fields {
        let value = mapping.resolve(row);
        apply_field(ctx, class, conf, &mut draft, field, &value).await;
    }

    draft.set("h_requesttype", class.display_name());
    draft.set("h_request_prefix", prefix);
    if draft.status.is_cancelled() {
        draft.set("h_archived", "1");
    }
    draft.record.related = related_records(class, conf, row);
    draft
}

async fn apply_field(
    ctx: &MigrationContext,
    class: RequestClass,
    conf: &RequestClassConfig,
    draft: &mut RecordDraft,
    field: &str,
    value: &str,
) {
    let resolver = &ctx.resolver;
    match strategy_for(field) {
        FieldStrategy::PlainCopy => {
            if !value.is_empty() {
                draft.set(field, value);
            }
        }
        FieldStrategy::AnalystLookup => {
            if let Some(analyst) = resolver.analyst(value).await {
                draft.set("h_ownerid", analyst.handle);
                draft.set("h_ownername", analyst.name);
            } else if !value.is_empty() {
                debug!(owner = value, "owner is not a known analyst");
            }
        }
        FieldStrategy::CustomerLookup => {
            if let Some(customer) = resolver.customer(value).await {
                draft.set("h_fk_user_id", customer.handle);
                draft.set("h_fk_user_name", customer.name);
            } else if !value.is_empty() {
                debug!(customer = value, "customer is not known");
            }
        }
        FieldStrategy::PriorityLookup => {
            let mut priority = match translate(&conf.priority_mapping, value) {
                Some(name) => resolver.priority(name).await,
                None => None,
            };
            if priority.is_none() && !conf.default_priority.is_empty() {
                priority = resolver.priority(&conf.default_priority).await;
            }
            if let Some(priority) = priority {
                draft.set("h_fk_priorityid", priority.id);
                draft.set("h_fk_priorityname", priority.name);
            }
        }
        FieldStrategy::CategoryLookup(group) => {
            if value.is_empty() {
                return;
            }
            let (table, id_field, name_field) = match group {
                CategoryGroup::Request => (&ctx.config.category_mapping, "h_category_id", "h_category"),
                CategoryGroup::Closure => (
                    &ctx.config.resolution_category_mapping,
                    "h_closure_category_id",
                    "h_closure_category",
                ),
            };
            match translate(table, value) {
                Some(code) => {
                    if let Some(category) = resolver.category(group, code).await {
                        draft.set(id_field, category.id);
                        draft.set(name_field, category.name);
                    }
                }
                None => debug!(group = group.as_str(), code = value, "no category mapping for code"),
            }
        }
        FieldStrategy::ServiceLookup => {
            let mut service = match translate(&conf.service_mapping, value) {
                Some(name) => resolver.service(name).await,
                None => None,
            };
            if service.is_none() && !conf.default_service.is_empty() {
                service = resolver.service(&conf.default_service).await;
            }
            if let Some(service) = service {
                draft.workflow = service.workflow_for(class).map(str::to_string);
                draft.set("h_fk_serviceid", service.id);
                draft.set("h_fk_servicename", service.name);
            }
        }
        FieldStrategy::StatusLookup => {
            let token = draft.status.as_token().to_string();
            if !token.is_empty() {
                draft.set("h_status", token);
            }
        }
        FieldStrategy::TeamLookup => {
            let mut team = match translate(&ctx.config.team_mapping, value) {
                Some(name) => resolver.team(name).await,
                None => None,
            };
            if team.is_none() && !conf.default_team.is_empty() {
                team = resolver.team(&conf.default_team).await;
            }
            if let Some(team) = team {
                draft.set("h_fk_team_id", team.id);
                draft.set("h_fk_team_name", team.name);
            }
        }
        FieldStrategy::SiteLookup => {
            let name = translate(&ctx.config.site_mapping, value).unwrap_or(value);
            let mut site = resolver.site(name).await;
            if site.is_none() && !conf.default_site.is_empty() {
                site = resolver.site(&conf.default_site).await;
            }
            if let Some(site) = site {
                draft.set("h_site_id", site.id);
                draft.set("h_site", site.name);
            }
        }
        FieldStrategy::DateConditional(rule) => {
            let carried = match rule {
                DateRule::Resolved => draft.status.is_resolved_or_closed(),
                DateRule::Closed => draft.status.carries_closed_date(),
            };
            if carried && !value.is_empty() {
                draft.set(field, value);
                if rule == DateRule::Closed {
                    draft.hold_until = Some(value.to_string());
                }
            }
        }
        FieldStrategy::HoldReason => {
            if !value.is_empty() {
                draft.hold_reason = Some(value.to_string());
            }
        }
        FieldStrategy::Deferred => {
            if !value.is_empty() {
                draft.deferred.insert(field.to_string(), value.to_string());
            }
        }
        FieldStrategy::Derived => {}
    }
}

fn related_records(class: RequestClass, conf: &RequestClassConfig, row: &SourceRow) -> Vec<RelatedRecord> {
    let mut call_type = Fields::new();
    let mut extended = Fields::new();
    extended.insert("h_request_type".into(), class.display_name().to_string());

    for (field, mapping) in &conf.additional_field_mapping {
        let value = mapping.resolve(row);
        if value.is_empty() {
            continue;
        }
        if let Some(column) = extended_column_name(field) {
            extended.insert(column, value.clone());
        }
        call_type.insert(field.clone(), value);
    }

    vec![
        RelatedRecord {
            relationship: "Call Type".into(),
            fields: call_type,
        },
        RelatedRecord {
            relationship: "Extended Information".into(),
            fields: extended,
        },
    ]
}

async fn after_create(ctx: &MigrationContext, draft: &RecordDraft, reference: &str) {
    if let Err(err) = ctx.remote.post_activity(reference, IMPORT_ACTIVITY).await {
        warn!(target_ref = reference, error = %err, "activity stream entry failed");
    }

    if !draft.deferred.is_empty() {
        if let Err(err) = ctx.remote.update(REQUEST_ENTITY, reference, &draft.deferred).await {
            warn!(target_ref = reference, error = %err, "unable to update log date and creator");
        }
    }

    if draft.status.spawns_workflow() {
        if let Some(workflow) = &draft.workflow {
            match ctx.remote.spawn_workflow(workflow, reference).await {
                Ok(process_id) => {
                    let mut fields = Fields::new();
                    fields.insert("h_bpm_id".into(), process_id);
                    if let Err(err) = ctx.remote.update(REQUEST_ENTITY, reference, &fields).await {
                        warn!(target_ref = reference, error = %err, "unable to link workflow to request");
                    }
                }
                Err(err) => warn!(target_ref = reference, workflow = %workflow, error = %err, "unable to spawn workflow"),
            }
        }
    }

    if draft.status.is_on_hold() {
        let until = draft.hold_until.as_deref().unwrap_or_default();
        let reason = draft.hold_reason.as_deref().unwrap_or(DEFAULT_HOLD_REASON);
        if let Err(err) = ctx.remote.hold_request(reference, until, reason).await {
            warn!(target_ref = reference, error = %err, "unable to place request on hold");
        }
    }
}
