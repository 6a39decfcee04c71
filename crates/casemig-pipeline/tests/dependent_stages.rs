mod support;

use std::io::Write;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use casemig_core::SourceRow;
use casemig_pipeline::MigrationPipeline;
use casemig_remote::request_urn;
use casemig_source::{AttachmentChunk, AttachmentMeta, MemorySource};
use flate2::write::GzEncoder;
use flate2::Compression;
use support::{child_of, context, incident, options, Call, RecordingRemote, INCIDENT_SQL, TASK_SQL};

fn chunked_gzip(payload: &[u8], parts: usize) -> Vec<AttachmentChunk> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).unwrap();
    let encoded = STANDARD.encode(encoder.finish().unwrap());
    let size = encoded.len().div_ceil(parts);
    encoded
        .as_bytes()
        .chunks(size)
        .enumerate()
        .map(|(position, part)| AttachmentChunk {
            position: position as i64,
            data: String::from_utf8(part.to_vec()).unwrap(),
        })
        .collect()
}

fn attachment(id: &str, file_name: &str) -> AttachmentMeta {
    AttachmentMeta {
        id: id.into(),
        file_name: file_name.into(),
        content_type: "text/plain".into(),
        size_bytes: 0,
        created_by: "jdoe".into(),
        created_on: "2024-01-05 12:00:00".into(),
    }
}

fn task(parent: &str, title: &str, category: &str, state: &str) -> SourceRow {
    SourceRow::new()
        .with("parent", parent)
        .with("short_description", title)
        .with("category", category)
        .with("state", state)
        .with("opened_at", "2024-01-02 08:00:00")
}

fn uploads(calls: &[Call]) -> Vec<(String, String, Vec<u8>)> {
    calls
        .iter()
        .filter_map(|call| match call {
            Call::Upload { request, file, bytes } => Some((request.clone(), file.clone(), bytes.clone())),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn chunked_attachment_is_uploaded_byte_identical() {
    let payload = b"line of an attached log file\n".repeat(64);
    let mut chunks = chunked_gzip(&payload, 3);
    assert_eq!(chunks.len(), 3);
    chunks.reverse();

    let remote = Arc::new(RecordingRemote::new());
    let source = MemorySource::new()
        .with_rows(INCIDENT_SQL, vec![incident("INC1", "has file", "1")])
        .with_attachment("guid-INC1", attachment("att-1", "logs/today?.txt"), chunks)
        .with_attachment(
            "guid-INC1",
            attachment("att-2", "broken.bin"),
            vec![AttachmentChunk {
                position: 0,
                data: "%%%".into(),
            }],
        );
    let ctx = context(options(2), &remote, source);

    let summary = MigrationPipeline::new(Arc::clone(&ctx)).run().await;

    let target = ctx.correlation.target_ref("INC1").await.unwrap();
    let uploaded = uploads(&remote.calls().await);
    assert_eq!(uploaded.len(), 1);
    assert_eq!(uploaded[0].0, target);
    assert_eq!(uploaded[0].1, "logs_today_.txt");
    assert_eq!(uploaded[0].2, payload);

    let records = remote.created("RequestAttachments").await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["h_request_id"], target);
    assert_eq!(records[0]["h_description"], "Originally added by jdoe");
    assert_eq!(records[0]["h_timestamp"], "2024-01-05 12:00:00");
    assert_eq!(records[0]["h_contentlocation"], format!("/attachments/{target}/logs_today_.txt"));
    assert_eq!(summary.counters.files_attached, 1);
}

#[tokio::test]
async fn attachments_toggle_disables_the_pass() {
    let remote = Arc::new(RecordingRemote::new());
    let source = MemorySource::new()
        .with_rows(INCIDENT_SQL, vec![incident("INC1", "has file", "1")])
        .with_attachment("guid-INC1", attachment("att-1", "a.txt"), chunked_gzip(b"abc", 1));
    let mut run = options(1);
    run.attachments = false;
    let ctx = context(run, &remote, source);

    let summary = MigrationPipeline::new(ctx).run().await;

    assert!(uploads(&remote.calls().await).is_empty());
    assert_eq!(summary.counters.files_attached, 0);
}

#[tokio::test]
async fn failed_parent_gets_no_dependent_work() {
    let remote = Arc::new(RecordingRemote::new().failing_on("broken"));
    let source = MemorySource::new()
        .with_rows(
            INCIDENT_SQL,
            vec![
                incident("PARENT", "broken", "1"),
                child_of(incident("CHILD", "child", "1"), "PARENT"),
                incident("SIBLING", "sibling", "1"),
            ],
        )
        .with_attachment("guid-PARENT", attachment("att-p", "p.txt"), chunked_gzip(b"parent", 1))
        .with_attachment("guid-SIBLING", attachment("att-s", "s.txt"), chunked_gzip(b"sibling", 1))
        .with_rows(
            TASK_SQL,
            vec![
                task("PARENT", "for parent", "General", "Open"),
                task("SIBLING", "for sibling", "General", "Open"),
            ],
        );
    let ctx = context(options(3), &remote, source);

    let summary = MigrationPipeline::new(Arc::clone(&ctx)).run().await;

    let sibling = ctx.correlation.target_ref("SIBLING").await.unwrap();
    let calls = remote.calls().await;

    let uploaded = uploads(&calls);
    assert_eq!(uploaded.len(), 1);
    assert_eq!(uploaded[0].0, sibling);

    let tasks: Vec<_> = calls
        .iter()
        .filter_map(|call| match call {
            Call::Task(task) => Some(task.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].object_ref_urn, request_urn(&sibling));

    assert!(remote.created("RelatedRequests").await.is_empty());
    assert_eq!(summary.associations_created, 0);
    assert_eq!(summary.activities_raised, 1);
}

#[tokio::test]
async fn imported_child_is_linked_to_parent_exactly_once() {
    let remote = Arc::new(RecordingRemote::new());
    let source = MemorySource::new().with_rows(
        INCIDENT_SQL,
        vec![
            incident("PARENT", "parent", "1"),
            child_of(incident("CHILD", "child", "1"), "PARENT"),
            child_of(incident("ORPHAN", "orphan", "1"), "MISSING"),
            child_of(incident("SELF", "self", "1"), "SELF"),
        ],
    );
    let ctx = context(options(4), &remote, source);

    let summary = MigrationPipeline::new(Arc::clone(&ctx)).run().await;

    let parent = ctx.correlation.target_ref("PARENT").await.unwrap();
    let child = ctx.correlation.target_ref("CHILD").await.unwrap();
    let links = remote.created("RelatedRequests").await;
    assert_eq!(links.len(), 1);
    assert_eq!(links[0]["h_fk_parentrequestid"], parent);
    assert_eq!(links[0]["h_fk_childrequestid"], child);
    assert_eq!(summary.associations_created, 1);
}

#[tokio::test]
async fn activities_get_outcomes_assignee_and_completion() {
    let remote = Arc::new(RecordingRemote::new());
    let source = MemorySource::new()
        .with_rows(INCIDENT_SQL, vec![incident("INC1", "parent", "1")])
        .with_rows(
            TASK_SQL,
            vec![
                task("INC1", "approve it", "BPM Authorisation", "Closed Complete")
                    .with("assigned_to", "analyst1")
                    .with("decision", "Approved")
                    .with("reason", "Looks fine"),
                task("INC1", "plain work", "General", "Open")
                    .with("assigned_to", "cust1")
                    .with("description", "details here"),
                task("UNKNOWN", "dropped", "General", "Open"),
            ],
        );
    let ctx = context(options(1), &remote, source);

    let summary = MigrationPipeline::new(Arc::clone(&ctx)).run().await;

    assert_eq!(summary.activities_raised, 2);
    let target = ctx.correlation.target_ref("INC1").await.unwrap();
    let calls = remote.calls().await;
    let tasks: Vec<_> = calls
        .iter()
        .filter_map(|call| match call {
            Call::Task(task) => Some(task.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(tasks.len(), 2);

    let approval = tasks.iter().find(|t| t.title == "approve it").unwrap();
    assert_eq!(approval.outcomes.len(), 2);
    assert_eq!(approval.outcomes[0].outcome, "accept");
    assert_eq!(approval.outcomes[1].outcome, "refuse");
    assert_eq!(approval.assign_to.as_deref(), Some("urn:sys:user:analyst1"));
    assert_eq!(approval.object_ref_urn, request_urn(&target));
    assert_eq!(approval.details, None);
    assert_eq!(approval.start_date.as_deref(), Some("2024-01-02 08:00:00"));

    let plain = tasks.iter().find(|t| t.title == "plain work").unwrap();
    assert_eq!(plain.outcomes.len(), 1);
    assert_eq!(plain.outcomes[0].outcome, "done");
    assert_eq!(plain.assign_to.as_deref(), Some("urn:sys:user:cust1"));
    assert_eq!(plain.details.as_deref(), Some("details here"));

    let completions: Vec<_> = calls
        .iter()
        .filter_map(|call| match call {
            Call::Complete { outcome, .. } => Some(outcome.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(completions, vec!["Approved\nLooks fine".to_string()]);
}
