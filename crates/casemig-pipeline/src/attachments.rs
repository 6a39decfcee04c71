//! Attachment pass: rebuild stored files from their chunks and upload them.

use std::io::Read;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use casemig_core::CorrelationEntry;
use casemig_remote::{EntityRecord, Fields};
use casemig_source::{AttachmentChunk, AttachmentMeta};
use flate2::read::GzDecoder;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::context::MigrationContext;
use crate::pool::WorkerPool;

pub const ATTACHMENT_ENTITY: &str = "RequestAttachments";

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("attachment has no stored chunks")]
    Empty,
    #[error("base64 decode failed: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("gzip decompress failed: {0}")]
    Decompress(#[source] std::io::Error),
}

fn compact(text: &str) -> String {
    text.chars().filter(|c| !c.is_ascii_whitespace()).collect()
}

pub fn reassemble_attachment(chunks: &[AttachmentChunk]) -> Result<Vec<u8>, AttachmentError> {
    if chunks.is_empty() {
        return Err(AttachmentError::Empty);
    }

    let per_chunk: Result<Vec<Vec<u8>>, _> = chunks
        .iter()
        .map(|chunk| STANDARD.decode(compact(&chunk.data)))
        .collect();
    let compressed = match per_chunk {
        Ok(parts) => parts.concat(),
        Err(_) => {
            let joined: String = chunks.iter().map(|chunk| compact(&chunk.data)).collect();
            STANDARD.decode(joined)?
        }
    };

    let mut bytes = Vec::new();
    GzDecoder::new(compressed.as_slice())
        .read_to_end(&mut bytes)
        .map_err(AttachmentError::Decompress)?;
    Ok(bytes)
}

pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | '|' | '\\' | '/' | ':' | '*' | '?' | '"' => '_',
            other => other,
        })
        .collect()
}

fn attachment_fields(target_ref: &str, meta: &AttachmentMeta, file_name: &str, location: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert("h_request_id".into(), target_ref.to_string());
    fields.insert("h_description".into(), format!("Originally added by {}", meta.created_by));
    fields.insert("h_filename".into(), file_name.to_string());
    fields.insert("h_contentlocation".into(), location.to_string());
    fields.insert("h_timestamp".into(), meta.created_on.clone());
    fields.insert("h_visibility".into(), "trustedGuest".into());
    fields
}

/// Upload the attachments of every correlated record. Returns files attached by this pass.
pub async fn import_attachments(ctx: &Arc<MigrationContext>) -> usize {
    let span = info_span!("attachments", run_id = %ctx.run_id);
    async {
        let before = ctx.counters.snapshot().await.files_attached;
        let entries: Vec<(String, CorrelationEntry)> = ctx
            .correlation
            .snapshot()
            .await
            .into_iter()
            .filter(|(_, entry)| entry.has_target() && !entry.source_guid.is_empty())
            .collect();
        info!(records = entries.len(), "processing attachments");

        let mut pool = WorkerPool::new("attachments", ctx.concurrency());
        for (source_key, entry) in entries {
            let ctx = Arc::clone(ctx);
            pool.spawn(async move {
                attach_record_files(&ctx, &source_key, &entry).await;
            })
            .await;
        }
        let panicked = pool.finish().await;

        let attached = ctx.counters.snapshot().await.files_attached.saturating_sub(before);
        info!(files_attached = attached, panicked, "attachments complete");
        attached
    }
    .instrument(span)
    .await
}

async fn attach_record_files(ctx: &MigrationContext, source_key: &str, entry: &CorrelationEntry) {
    let target_ref = entry.target_ref.as_str();
    let files = match ctx.source.attachments(&entry.source_guid).await {
        Ok(files) => files,
        Err(err) => {
            warn!(source_key, target_ref, error = %err, "unable to list attachments");
            return;
        }
    };

    for meta in &files {
        let file = sanitize_file_name(&meta.file_name);
        let chunks = match ctx.source.attachment_chunks(&meta.id).await {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!(target_ref, file = %file, error = %err, "unable to read attachment chunks");
                continue;
            }
        };
        let bytes = match reassemble_attachment(&chunks) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(target_ref, file = %file, error = %err, "skipping attachment");
                continue;
            }
        };

        let location = match ctx.remote.upload_file(target_ref, &file, &bytes).await {
            Ok(location) => location,
            Err(err) => {
                warn!(target_ref, file = %file, error = %err, "upload failed");
                continue;
            }
        };
        if location.is_empty() {
            warn!(target_ref, file = %file, "upload returned no content location");
            continue;
        }

        let record = EntityRecord {
            primary: attachment_fields(target_ref, meta, &file, &location),
            related: Vec::new(),
        };
        match ctx.remote.create(ATTACHMENT_ENTITY, &record).await {
            Ok(_) => {
                ctx.counters.record_file_attached().await;
                debug!(target_ref, file = %file, size = bytes.len(), "attachment added");
            }
            Err(err) => warn!(target_ref, file = %file, error = %err, "unable to record attachment"),
        }
    }
}
