use casemig_core::SourceValue;
use chrono::NaiveDate;
use casemig_source::{Dialect, SourceQuery, SqlSource};

async fn seeded_source() -> SqlSource {
    let source = SqlSource::connect_url("sqlite::memory:", 1).await.unwrap();
    assert_eq!(source.dialect(), Dialect::Sqlite);

    let statements = [
        "CREATE TABLE incident (callref TEXT, priority INTEGER, score REAL, notes TEXT)",
        "INSERT INTO incident VALUES ('INC001', 2, 1.5, NULL)",
        "INSERT INTO incident VALUES ('INC002', 4, 0.25, 'printer on fire')",
        "CREATE TABLE sys_attachment (sys_id TEXT, table_sys_id TEXT, file_name TEXT, content_type TEXT, \
         size_bytes INTEGER, sys_created_by TEXT, sys_created_on TEXT)",
        "INSERT INTO sys_attachment VALUES ('att-1', 'guid-1', 'log.txt', 'text/plain', 12, 'jdoe', '2024-01-02 03:04:05')",
        "CREATE TABLE sys_attachment_doc (sys_attachment TEXT, position INTEGER, length INTEGER, data TEXT)",
        "INSERT INTO sys_attachment_doc VALUES ('att-1', 1, 4, 'BBBB')",
        "INSERT INTO sys_attachment_doc VALUES ('att-1', 0, 4, 'AAAA')",
        "CREATE TABLE sys_journal_field (element_id TEXT, element TEXT, value TEXT, sys_created_by TEXT, sys_created_on TEXT)",
        "INSERT INTO sys_journal_field VALUES ('guid-1', 'work_notes', 'second', 'amy', '2024-01-03 09:00:00')",
        "INSERT INTO sys_journal_field VALUES ('guid-1', 'comments', 'first', 'bob', '2024-01-02 09:00:00')",
        "INSERT INTO sys_journal_field VALUES ('guid-2', 'comments', 'other record', 'bob', '2024-01-01 09:00:00')",
    ];
    for statement in statements {
        source.execute(statement).await.unwrap();
    }
    source
}

#[tokio::test]
async fn extract_decodes_typed_columns_in_order() {
    let source = seeded_source().await;
    let rows = source
        .extract("SELECT callref, priority, score, notes FROM incident ORDER BY callref")
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    let first = &rows[0];
    let names: Vec<&str> = first.columns().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["callref", "priority", "score", "notes"]);
    assert_eq!(first.get("priority"), Some(&SourceValue::Int(2)));
    assert_eq!(first.get("score"), Some(&SourceValue::Float(1.5)));
    assert_eq!(first.get("notes"), Some(&SourceValue::Null));
    assert_eq!(rows[1].text("notes").as_deref(), Some("printer on fire"));
}

#[tokio::test]
async fn attachment_queries_return_ordered_chunks() {
    let source = seeded_source().await;

    let attachments = source.attachments("guid-1").await.unwrap();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].file_name, "log.txt");
    assert_eq!(attachments[0].size_bytes, 12);
    assert_eq!(attachments[0].created_on, "2024-01-02 03:04:05");

    let chunks = source.attachment_chunks("att-1").await.unwrap();
    let data: Vec<&str> = chunks.iter().map(|chunk| chunk.data.as_str()).collect();
    assert_eq!(data, vec!["AAAA", "BBBB"]);
}

#[tokio::test]
async fn journal_is_scoped_to_record_and_oldest_first() {
    let source = seeded_source().await;
    let entries = source.journal("guid-1").await.unwrap();
    let values: Vec<&str> = entries.iter().map(|entry| entry.value.as_str()).collect();
    assert_eq!(values, vec!["first", "second"]);
    assert_eq!(entries[0].created_by, "bob");
}

#[tokio::test]
async fn native_datetime_and_boolean_columns_decode_to_typed_values() {
    let source = seeded_source().await;
    source
        .execute("CREATE TABLE change_request (number TEXT, opened_at DATETIME, active BOOLEAN)")
        .await
        .unwrap();
    source
        .execute("INSERT INTO change_request VALUES ('CHG1', '2024-02-03 04:05:06', 1)")
        .await
        .unwrap();
    source
        .execute("INSERT INTO change_request VALUES ('CHG2', NULL, 0)")
        .await
        .unwrap();

    let rows = source
        .extract("SELECT number, opened_at, active FROM change_request ORDER BY number")
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    let opened = NaiveDate::from_ymd_opt(2024, 2, 3).unwrap().and_hms_opt(4, 5, 6).unwrap();
    assert_eq!(rows[0].get("opened_at"), Some(&SourceValue::Timestamp(opened)));
    assert_eq!(rows[0].text("opened_at").as_deref(), Some("2024-02-03 04:05:06"));
    assert_eq!(rows[0].get("active"), Some(&SourceValue::Int(1)));
    assert_eq!(rows[1].get("opened_at"), Some(&SourceValue::Null));
    assert_eq!(rows[1].get("active"), Some(&SourceValue::Int(0)));
}

#[tokio::test]
async fn datetime_audit_columns_render_as_text_in_fixed_queries() {
    let source = seeded_source().await;
    let statements = [
        "DROP TABLE sys_attachment",
        "CREATE TABLE sys_attachment (sys_id TEXT, table_sys_id TEXT, file_name TEXT, content_type TEXT, \
         size_bytes INTEGER, sys_created_by TEXT, sys_created_on DATETIME)",
        "INSERT INTO sys_attachment VALUES ('att-9', 'guid-9', 'a.txt', 'text/plain', 3, 'jdoe', '2024-06-07 08:09:10')",
    ];
    for statement in statements {
        source.execute(statement).await.unwrap();
    }

    let attachments = source.attachments("guid-9").await.unwrap();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].created_on, "2024-06-07 08:09:10");
}

#[tokio::test]
async fn failing_statement_surfaces_database_error() {
    let source = seeded_source().await;
    assert!(source.extract("SELECT * FROM missing_table").await.is_err());
}
