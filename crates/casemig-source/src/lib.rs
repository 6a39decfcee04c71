//! Legacy SQL source access: row extraction, attachment blobs, journal entries.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use casemig_core::{SourceRow, SourceValue};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo, ValueRef};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "casemig-source";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unsupported source driver `{0}`")]
    UnsupportedDriver(String),
    #[error("source database setting `{0}` is not set")]
    MissingSetting(&'static str),
    #[error("query failed: {0}")]
    Query(String),
}

/// Attachment metadata row for one source record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttachmentMeta {
    pub id: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub created_by: String,
    pub created_on: String,
}

/// One stored slice of an attachment: base64 text of part of a gzip stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentChunk {
    pub position: i64,
    pub data: String,
}

/// A free-text diary entry written against a source record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JournalEntry {
    pub element: String,
    pub value: String,
    pub created_by: String,
    pub created_on: String,
}

/// Read-only view of the legacy store that the import stages consume.
#[async_trait]
pub trait SourceQuery: Send + Sync {
    /// Run a configured extraction statement and return every row.
    async fn extract(&self, statement: &str) -> Result<Vec<SourceRow>, SourceError>;

    async fn attachments(&self, source_guid: &str) -> Result<Vec<AttachmentMeta>, SourceError>;

    /// Chunks of one attachment, ordered by position.
    async fn attachment_chunks(&self, attachment_id: &str) -> Result<Vec<AttachmentChunk>, SourceError>;

    /// Journal entries of one record, oldest first.
    async fn journal(&self, source_guid: &str) -> Result<Vec<JournalEntry>, SourceError>;
}

/// Join index-keyed statement fragments in numeric index order.
pub fn assemble_statement(fragments: &BTreeMap<String, String>) -> String {
    let mut ordered: Vec<(&String, &String)> = fragments.iter().collect();
    ordered.sort_by(|(a, _), (b, _)| match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => std::cmp::Ordering::Less,
        (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    });
    ordered
        .into_iter()
        .map(|(_, fragment)| fragment.trim())
        .filter(|fragment| !fragment.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    MySql,
    Postgres,
    Sqlite,
}

impl Dialect {
    pub fn from_driver(driver: &str) -> Result<Self, SourceError> {
        match driver.trim().to_ascii_lowercase().as_str() {
            "" => Err(SourceError::MissingSetting("Driver")),
            "mysql" | "mysql320" => Ok(Dialect::MySql),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            other => Err(SourceError::UnsupportedDriver(other.to_string())),
        }
    }

    pub fn from_url(url: &str) -> Result<Self, SourceError> {
        let scheme = url.split(':').next().unwrap_or_default();
        Self::from_driver(scheme)
    }

    fn default_port(self) -> u16 {
        match self {
            Dialect::MySql => 3306,
            Dialect::Postgres => 5432,
            Dialect::Sqlite => 0,
        }
    }

    fn placeholder(self) -> &'static str {
        match self {
            Dialect::Postgres => "$1",
            Dialect::MySql | Dialect::Sqlite => "?",
        }
    }
}

/// `SNAppDBConf` block of the import configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct SourceDbConfig {
    pub driver: String,
    pub server: String,
    pub database: String,
    pub user_name: String,
    pub password: String,
    pub port: u16,
    pub encrypt: bool,
}

impl SourceDbConfig {
    pub fn dialect(&self) -> Result<Dialect, SourceError> {
        Dialect::from_driver(&self.driver)
    }

    pub fn connection_url(&self) -> Result<String, SourceError> {
        let dialect = self.dialect()?;
        if self.database.is_empty() {
            return Err(SourceError::MissingSetting("Database"));
        }
        if dialect == Dialect::Sqlite {
            return Ok(if self.database == ":memory:" {
                "sqlite::memory:".to_string()
            } else {
                format!("sqlite://{}", self.database)
            });
        }
        if self.server.is_empty() {
            return Err(SourceError::MissingSetting("Server"));
        }
        if self.user_name.is_empty() {
            return Err(SourceError::MissingSetting("UserName"));
        }

        let port = if self.port == 0 { dialect.default_port() } else { self.port };
        let credentials = format!("{}:{}", encode_userinfo(&self.user_name), encode_userinfo(&self.password));
        Ok(match dialect {
            Dialect::MySql => format!(
                "mysql://{credentials}@{}:{port}/{}?ssl-mode={}",
                self.server,
                self.database,
                if self.encrypt { "required" } else { "disabled" }
            ),
            _ => format!(
                "postgres://{credentials}@{}:{port}/{}?sslmode={}",
                self.server,
                self.database,
                if self.encrypt { "require" } else { "disable" }
            ),
        })
    }
}

fn encode_userinfo(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => out.push(byte as char),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[derive(Debug, Clone)]
enum SourcePool {
    MySql(MySqlPool),
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

/// Source backed by a native sqlx pool for the configured driver.
#[derive(Debug, Clone)]
pub struct SqlSource {
    pool: SourcePool,
    dialect: Dialect,
}

impl SqlSource {
    pub async fn connect(config: &SourceDbConfig, max_connections: u32) -> Result<Self, SourceError> {
        let url = config.connection_url()?;
        Self::connect_url(&url, max_connections).await
    }

    pub async fn connect_url(url: &str, max_connections: u32) -> Result<Self, SourceError> {
        let dialect = Dialect::from_url(url)?;
        let max_connections = max_connections.max(1);
        let pool = match dialect {
            Dialect::MySql => SourcePool::MySql(
                MySqlPoolOptions::new().max_connections(max_connections).connect(url).await?,
            ),
            Dialect::Postgres => SourcePool::Postgres(
                PgPoolOptions::new().max_connections(max_connections).connect(url).await?,
            ),
            Dialect::Sqlite => SourcePool::Sqlite(
                SqlitePoolOptions::new().max_connections(max_connections).connect(url).await?,
            ),
        };
        Ok(Self { pool, dialect })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Run a statement that returns no rows; yields the affected row count.
    pub async fn execute(&self, sql: &str) -> Result<u64, SourceError> {
        let affected = match &self.pool {
            SourcePool::MySql(pool) => sqlx::query(sql).execute(pool).await?.rows_affected(),
            SourcePool::Postgres(pool) => sqlx::query(sql).execute(pool).await?.rows_affected(),
            SourcePool::Sqlite(pool) => sqlx::query(sql).execute(pool).await?.rows_affected(),
        };
        Ok(affected)
    }

    async fn fetch(&self, sql: &str, key: Option<&str>) -> Result<Vec<SourceRow>, SourceError> {
        debug!(sql, "source query");
        let rows = match &self.pool {
            SourcePool::MySql(pool) => {
                let mut query = sqlx::query(sql);
                if let Some(key) = key {
                    query = query.bind(key.to_string());
                }
                let rows = query.fetch_all(pool).await?;
                rows.iter().map(|row| decode_row(row, mysql_unsigned)).collect()
            }
            SourcePool::Postgres(pool) => {
                let mut query = sqlx::query(sql);
                if let Some(key) = key {
                    query = query.bind(key.to_string());
                }
                let rows = query.fetch_all(pool).await?;
                rows.iter().map(|row| decode_row(row, no_extra)).collect()
            }
            SourcePool::Sqlite(pool) => {
                let mut query = sqlx::query(sql);
                if let Some(key) = key {
                    query = query.bind(key.to_string());
                }
                let rows = query.fetch_all(pool).await?;
                rows.iter().map(|row| decode_row(row, no_extra)).collect()
            }
        };
        Ok(rows)
    }
}

/// Column families, keyed by the driver's reported type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Null,
    Integer,
    Float,
    Boolean,
    Timestamp,
    TimestampTz,
    Date,
    Other,
}

impl ColumnKind {
    pub fn from_type_name(name: &str) -> Self {
        let upper = name.to_ascii_uppercase();
        // MySQL reports unsigned columns as e.g. `BIGINT UNSIGNED`.
        match upper.split_whitespace().next().unwrap_or_default() {
            "NULL" => ColumnKind::Null,
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" | "INT2" | "INT4" | "INT8"
            | "YEAR" => ColumnKind::Integer,
            "REAL" | "FLOAT" | "DOUBLE" | "FLOAT4" | "FLOAT8" => ColumnKind::Float,
            "BOOL" | "BOOLEAN" => ColumnKind::Boolean,
            "DATETIME" | "TIMESTAMP" => ColumnKind::Timestamp,
            "TIMESTAMPTZ" => ColumnKind::TimestampTz,
            "DATE" => ColumnKind::Date,
            _ => ColumnKind::Other,
        }
    }
}

fn no_extra<R>(_row: &R, _index: usize) -> Option<SourceValue> {
    None
}

fn mysql_unsigned(row: &MySqlRow, index: usize) -> Option<SourceValue> {
    let value = row.try_get::<u64, _>(index).ok()?;
    Some(match i64::try_from(value) {
        Ok(value) => SourceValue::Int(value),
        Err(_) => SourceValue::Text(value.to_string()),
    })
}

fn decode_row<'r, R>(row: &'r R, extra: fn(&R, usize) -> Option<SourceValue>) -> SourceRow
where
    R: Row,
    usize: ColumnIndex<R>,
    i64: Decode<'r, R::Database> + Type<R::Database>,
    i32: Decode<'r, R::Database> + Type<R::Database>,
    i16: Decode<'r, R::Database> + Type<R::Database>,
    f64: Decode<'r, R::Database> + Type<R::Database>,
    f32: Decode<'r, R::Database> + Type<R::Database>,
    bool: Decode<'r, R::Database> + Type<R::Database>,
    String: Decode<'r, R::Database> + Type<R::Database>,
    Vec<u8>: Decode<'r, R::Database> + Type<R::Database>,
    NaiveDateTime: Decode<'r, R::Database> + Type<R::Database>,
    NaiveDate: Decode<'r, R::Database> + Type<R::Database>,
    DateTime<Utc>: Decode<'r, R::Database> + Type<R::Database>,
{
    let mut out = SourceRow::new();
    for (index, column) in row.columns().iter().enumerate() {
        let kind = ColumnKind::from_type_name(column.type_info().name());
        let null = row.try_get_raw(index).map(|raw| raw.is_null()).unwrap_or(true);
        let value = if null {
            SourceValue::Null
        } else {
            decode_value(row, index, kind, extra).unwrap_or_else(|| {
                debug!(column = column.name(), kind = ?kind, "undecodable source column treated as null");
                SourceValue::Null
            })
        };
        out.insert(column.name(), value);
    }
    out
}

/// Typed decode for the column's family first, then progressively looser text fallbacks.
fn decode_value<'r, R>(
    row: &'r R,
    index: usize,
    kind: ColumnKind,
    extra: fn(&R, usize) -> Option<SourceValue>,
) -> Option<SourceValue>
where
    R: Row,
    usize: ColumnIndex<R>,
    i64: Decode<'r, R::Database> + Type<R::Database>,
    i32: Decode<'r, R::Database> + Type<R::Database>,
    i16: Decode<'r, R::Database> + Type<R::Database>,
    f64: Decode<'r, R::Database> + Type<R::Database>,
    f32: Decode<'r, R::Database> + Type<R::Database>,
    bool: Decode<'r, R::Database> + Type<R::Database>,
    String: Decode<'r, R::Database> + Type<R::Database>,
    Vec<u8>: Decode<'r, R::Database> + Type<R::Database>,
    NaiveDateTime: Decode<'r, R::Database> + Type<R::Database>,
    NaiveDate: Decode<'r, R::Database> + Type<R::Database>,
    DateTime<Utc>: Decode<'r, R::Database> + Type<R::Database>,
{
    let typed = match kind {
        ColumnKind::Null => return Some(SourceValue::Null),
        ColumnKind::Integer => row
            .try_get::<i64, _>(index)
            .or_else(|_| row.try_get::<i32, _>(index).map(i64::from))
            .or_else(|_| row.try_get::<i16, _>(index).map(i64::from))
            .ok()
            .map(SourceValue::Int)
            .or_else(|| extra(row, index)),
        ColumnKind::Float => row
            .try_get::<f64, _>(index)
            .or_else(|_| row.try_get::<f32, _>(index).map(f64::from))
            .ok()
            .map(SourceValue::Float),
        ColumnKind::Boolean => row
            .try_get::<bool, _>(index)
            .ok()
            .map(|flag| SourceValue::Int(i64::from(flag))),
        ColumnKind::Timestamp => row
            .try_get::<NaiveDateTime, _>(index)
            .or_else(|_| row.try_get::<DateTime<Utc>, _>(index).map(|at| at.naive_utc()))
            .ok()
            .map(SourceValue::Timestamp),
        ColumnKind::TimestampTz => row
            .try_get::<DateTime<Utc>, _>(index)
            .ok()
            .map(|at| SourceValue::Timestamp(at.naive_utc())),
        ColumnKind::Date => row
            .try_get::<NaiveDate, _>(index)
            .ok()
            .map(|date| SourceValue::Text(date.to_string())),
        ColumnKind::Other => None,
    };
    if typed.is_some() {
        return typed;
    }

    if let Ok(text) = row.try_get::<String, _>(index) {
        return Some(SourceValue::Text(text));
    }
    if let Some(value) = extra(row, index) {
        return Some(value);
    }
    if let Ok(value) = row.try_get::<i64, _>(index) {
        return Some(SourceValue::Int(value));
    }
    if let Ok(value) = row.try_get::<f64, _>(index) {
        return Some(SourceValue::Float(value));
    }
    if let Ok(bytes) = row.try_get::<Vec<u8>, _>(index) {
        return Some(SourceValue::Text(String::from_utf8_lossy(&bytes).into_owned()));
    }
    // MySQL sends DECIMAL and friends as text even in the binary protocol.
    row.try_get_unchecked::<String, _>(index).ok().map(SourceValue::Text)
}

fn int_of(row: &SourceRow, column: &str) -> i64 {
    match row.get(column) {
        Some(SourceValue::Int(value)) => *value,
        Some(SourceValue::Float(value)) => *value as i64,
        _ => row.text(column).and_then(|text| text.parse().ok()).unwrap_or(0),
    }
}

#[async_trait]
impl SourceQuery for SqlSource {
    async fn extract(&self, statement: &str) -> Result<Vec<SourceRow>, SourceError> {
        self.fetch(statement, None).await
    }

    async fn attachments(&self, source_guid: &str) -> Result<Vec<AttachmentMeta>, SourceError> {
        let sql = format!(
            "SELECT sys_id, file_name, content_type, size_bytes, sys_created_by, sys_created_on \
             FROM sys_attachment WHERE table_sys_id = {}",
            self.dialect.placeholder()
        );
        let rows = self.fetch(&sql, Some(source_guid)).await?;
        Ok(rows
            .iter()
            .map(|row| AttachmentMeta {
                id: row.text_or_empty("sys_id"),
                file_name: row.text_or_empty("file_name"),
                content_type: row.text_or_empty("content_type"),
                size_bytes: int_of(row, "size_bytes"),
                created_by: row.text_or_empty("sys_created_by"),
                created_on: row.text_or_empty("sys_created_on"),
            })
            .collect())
    }

    async fn attachment_chunks(&self, attachment_id: &str) -> Result<Vec<AttachmentChunk>, SourceError> {
        let sql = format!(
            "SELECT position, data FROM sys_attachment_doc WHERE sys_attachment = {} ORDER BY position ASC",
            self.dialect.placeholder()
        );
        let rows = self.fetch(&sql, Some(attachment_id)).await?;
        Ok(rows
            .iter()
            .map(|row| AttachmentChunk {
                position: int_of(row, "position"),
                data: row.text_or_empty("data"),
            })
            .collect())
    }

    async fn journal(&self, source_guid: &str) -> Result<Vec<JournalEntry>, SourceError> {
        let sql = format!(
            "SELECT element, value, sys_created_by, sys_created_on \
             FROM sys_journal_field WHERE element_id = {} ORDER BY sys_created_on ASC",
            self.dialect.placeholder()
        );
        let rows = self.fetch(&sql, Some(source_guid)).await?;
        Ok(rows
            .iter()
            .map(|row| JournalEntry {
                element: row.text_or_empty("element"),
                value: row.text_or_empty("value"),
                created_by: row.text_or_empty("sys_created_by"),
                created_on: row.text_or_empty("sys_created_on"),
            })
            .collect())
    }
}

/// In-memory source keyed by statement text and record GUID.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    statements: HashMap<String, Vec<SourceRow>>,
    failing: HashSet<String>,
    attachments: HashMap<String, Vec<AttachmentMeta>>,
    chunks: HashMap<String, Vec<AttachmentChunk>>,
    journal: HashMap<String, Vec<JournalEntry>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(mut self, statement: impl Into<String>, rows: Vec<SourceRow>) -> Self {
        self.statements.insert(statement.into(), rows);
        self
    }

    /// Make `statement` fail when extracted.
    pub fn with_failing(mut self, statement: impl Into<String>) -> Self {
        self.failing.insert(statement.into());
        self
    }

    pub fn with_attachment(
        mut self,
        source_guid: impl Into<String>,
        meta: AttachmentMeta,
        chunks: Vec<AttachmentChunk>,
    ) -> Self {
        self.chunks.insert(meta.id.clone(), chunks);
        self.attachments.entry(source_guid.into()).or_default().push(meta);
        self
    }

    pub fn with_journal(mut self, source_guid: impl Into<String>, entries: Vec<JournalEntry>) -> Self {
        self.journal.insert(source_guid.into(), entries);
        self
    }
}

#[async_trait]
impl SourceQuery for MemorySource {
    async fn extract(&self, statement: &str) -> Result<Vec<SourceRow>, SourceError> {
        if self.failing.contains(statement) {
            return Err(SourceError::Query(format!("statement rejected: {statement}")));
        }
        Ok(self.statements.get(statement).cloned().unwrap_or_default())
    }

    async fn attachments(&self, source_guid: &str) -> Result<Vec<AttachmentMeta>, SourceError> {
        Ok(self.attachments.get(source_guid).cloned().unwrap_or_default())
    }

    async fn attachment_chunks(&self, attachment_id: &str) -> Result<Vec<AttachmentChunk>, SourceError> {
        let mut chunks = self.chunks.get(attachment_id).cloned().unwrap_or_default();
        chunks.sort_by_key(|chunk| chunk.position);
        Ok(chunks)
    }

    async fn journal(&self, source_guid: &str) -> Result<Vec<JournalEntry>, SourceError> {
        let mut entries = self.journal.get(source_guid).cloned().unwrap_or_default();
        entries.sort_by(|a, b| a.created_on.cmp(&b.created_on));
        Ok(entries)
    }
}
