//! Core domain model for casemig: typed source rows, field templates, request classes.

use std::fmt;

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "casemig-core";

/// Column holding the source record identifier used as the correlation key.
pub const SOURCE_KEY_COLUMN: &str = "callref";
/// Column holding the source identifier of the parent record, if any.
pub const PARENT_KEY_COLUMN: &str = "parent_task_ref";
/// Column holding the source GUID used to fetch attachments and journal entries.
pub const SOURCE_GUID_COLUMN: &str = "request_guid";

/// Placeholder name that renders the record-class marker instead of a column value.
pub const RECORD_CLASS_TOKEN: &str = "callclass";
pub const CHILD_TASK_CLASS: &str = "sc_task";
pub const CHILD_TASK_SENTINEL: &str = "Child Task of Parent Request!";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One scalar value read from the source database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SourceValue {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Timestamp(NaiveDateTime),
}

impl SourceValue {
    /// Render the value for use in a target field. `None` means "no value".
    pub fn render(&self) -> Option<String> {
        match self {
            SourceValue::Null => None,
            SourceValue::Text(text) => Some(text.clone()),
            SourceValue::Int(value) => Some(value.to_string()),
            SourceValue::Float(value) => Some(value.to_string()),
            SourceValue::Timestamp(value) => Some(value.format(TIMESTAMP_FORMAT).to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SourceValue::Null)
    }
}

impl From<&str> for SourceValue {
    fn from(value: &str) -> Self {
        SourceValue::Text(value.to_string())
    }
}

impl From<String> for SourceValue {
    fn from(value: String) -> Self {
        SourceValue::Text(value)
    }
}

impl From<i64> for SourceValue {
    fn from(value: i64) -> Self {
        SourceValue::Int(value)
    }
}

impl From<f64> for SourceValue {
    fn from(value: f64) -> Self {
        SourceValue::Float(value)
    }
}

impl From<NaiveDateTime> for SourceValue {
    fn from(value: NaiveDateTime) -> Self {
        SourceValue::Timestamp(value)
    }
}

impl<T: Into<SourceValue>> From<Option<T>> for SourceValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(SourceValue::Null)
    }
}

/// Column name -> value mapping for one source record, in column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRow {
    columns: IndexMap<String, SourceValue>,
}

impl SourceRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, mostly for fixtures.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<SourceValue>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<SourceValue>) {
        self.columns.insert(column.into(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&SourceValue> {
        self.columns.get(column)
    }

    /// Rendered, non-empty value of a column. Absent, null and empty all yield `None`.
    pub fn text(&self, column: &str) -> Option<String> {
        self.get(column)
            .and_then(SourceValue::render)
            .filter(|value| !value.is_empty())
    }

    /// Like [`SourceRow::text`] but collapses "no value" to an empty string.
    pub fn text_or_empty(&self, column: &str) -> String {
        self.text(column).unwrap_or_default()
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &SourceValue)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<K: Into<String>, V: Into<SourceValue>> FromIterator<(K, V)> for SourceRow {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = SourceRow::new();
        for (column, value) in iter {
            row.insert(column, value);
        }
        row
    }
}

/// A configured mapping template such as `"[number] - [short_description]"`.
///
/// Each `[column]` placeholder is replaced with the rendered column value of the
/// row being imported. Unknown or null columns resolve to an empty string; a
/// template never fails to resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMapping(String);

impl FieldMapping {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn resolve(&self, row: &SourceRow) -> String {
        resolve_template(&self.0, row)
    }
}

impl From<&str> for FieldMapping {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Display for FieldMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Substitute every `[name]` placeholder in `template` from `row`.
///
/// A placeholder runs from a `[` to the next `]`; an unterminated `[` is kept as
/// literal text.
pub fn resolve_template(template: &str, row: &SourceRow) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open + 1..].find(']').map(|i| open + 1 + i) else {
            break;
        };
        out.push_str(&rest[..open]);
        out.push_str(&placeholder_value(&rest[open + 1..close], row));
        rest = &rest[close + 1..];
    }

    out.push_str(rest);
    out
}

fn placeholder_value(name: &str, row: &SourceRow) -> String {
    if name == RECORD_CLASS_TOKEN {
        return match row.text(name) {
            Some(class) if class == CHILD_TASK_CLASS => CHILD_TASK_SENTINEL.to_string(),
            _ => String::new(),
        };
    }
    row.text_or_empty(name)
}

/// The primary record classes that can be imported, in import order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RequestClass {
    Incident,
    ServiceRequest,
    ChangeRequest,
    Problem,
    KnownError,
    Release,
}

impl RequestClass {
    pub const ALL: [RequestClass; 6] = [
        RequestClass::Incident,
        RequestClass::ServiceRequest,
        RequestClass::ChangeRequest,
        RequestClass::Problem,
        RequestClass::KnownError,
        RequestClass::Release,
    ];

    /// Name of the class as the target system spells it in `h_requesttype`.
    pub fn display_name(self) -> &'static str {
        match self {
            RequestClass::Incident => "Incident",
            RequestClass::ServiceRequest => "Service Request",
            RequestClass::ChangeRequest => "Change Request",
            RequestClass::Problem => "Problem",
            RequestClass::KnownError => "Known Error",
            RequestClass::Release => "Release",
        }
    }

    pub fn default_prefix(self) -> &'static str {
        match self {
            RequestClass::Incident => "IN",
            RequestClass::ServiceRequest => "SR",
            RequestClass::ChangeRequest => "CH",
            RequestClass::Problem => "PM",
            RequestClass::KnownError => "KE",
            RequestClass::Release => "RM",
        }
    }

    /// Application setting that holds the reference prefix for this class.
    pub fn prefix_setting(self) -> &'static str {
        match self {
            RequestClass::Incident => "guest.app.requests.types.IN",
            RequestClass::ServiceRequest => "guest.app.requests.types.SR",
            RequestClass::ChangeRequest => "app.requests.types.CH",
            RequestClass::Problem => "app.requests.types.PM",
            RequestClass::KnownError => "app.requests.types.KE",
            RequestClass::Release => "app.requests.types.RM",
        }
    }
}

impl fmt::Display for RequestClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Internal status token produced by the status translation table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    Open,
    New,
    Resolved,
    Closed,
    OnHold,
    Cancelled,
    Other(String),
}

impl RequestStatus {
    /// Parse a `status.*` token; anything unrecognised is kept verbatim.
    pub fn from_token(token: &str) -> Self {
        match token {
            "status.open" => RequestStatus::Open,
            "status.new" => RequestStatus::New,
            "status.resolved" => RequestStatus::Resolved,
            "status.closed" => RequestStatus::Closed,
            "status.onHold" => RequestStatus::OnHold,
            "status.cancelled" => RequestStatus::Cancelled,
            other => RequestStatus::Other(other.to_string()),
        }
    }

    pub fn as_token(&self) -> &str {
        match self {
            RequestStatus::Open => "status.open",
            RequestStatus::New => "status.new",
            RequestStatus::Resolved => "status.resolved",
            RequestStatus::Closed => "status.closed",
            RequestStatus::OnHold => "status.onHold",
            RequestStatus::Cancelled => "status.cancelled",
            RequestStatus::Other(token) => token,
        }
    }

    pub fn is_resolved_or_closed(&self) -> bool {
        matches!(self, RequestStatus::Resolved | RequestStatus::Closed)
    }

    pub fn is_on_hold(&self) -> bool {
        matches!(self, RequestStatus::OnHold)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RequestStatus::Cancelled)
    }

    /// Whether the closed-date field is carried on create (it doubles as hold-until).
    pub fn carries_closed_date(&self) -> bool {
        self.is_resolved_or_closed() || self.is_on_hold()
    }

    /// Open records get their service workflow spawned after create.
    pub fn spawns_workflow(&self) -> bool {
        !(self.is_resolved_or_closed() || self.is_cancelled() || self.is_on_hold())
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// Run-scoped link between a source record and the target record created for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationEntry {
    pub target_ref: String,
    pub parent_key: String,
    pub source_guid: String,
}

impl CorrelationEntry {
    pub fn has_target(&self) -> bool {
        !self.target_ref.is_empty()
    }

    pub fn has_parent(&self) -> bool {
        !self.parent_key.is_empty()
    }
}
