//! Remote case-management session contract + XMLMC method-call client.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod xmlmc;

pub use xmlmc::{instance_url, parse_response, MethodCall, MethodResponse, XmlmcClient, XmlmcConfig};

pub const CRATE_NAME: &str = "casemig-remote";

pub const APP_SERVICE_MANAGER: &str = "com.hornbill.servicemanager";
pub const APP_CORE: &str = "com.hornbill.core";

/// Flat column -> value payload of one target record.
pub type Fields = BTreeMap<String, String>;

/// Object reference URN of a request, as used by activity streams and tasks.
pub fn request_urn(reference: &str) -> String {
    format!("urn:sys:entity:{APP_SERVICE_MANAGER}:Requests:{reference}")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntityRecord {
    pub primary: Fields,
    pub related: Vec<RelatedRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelatedRecord {
    pub relationship: String,
    pub fields: Fields,
}

/// Result of a profile code lookup: the category id plus its canonical full name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileCode {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub outcome: String,
    pub display_name: String,
    pub requires_reason: bool,
}

impl TaskOutcome {
    pub fn new(outcome: &str, display_name: &str, requires_reason: bool) -> Self {
        Self {
            outcome: outcome.to_string(),
            display_name: display_name.to_string(),
            requires_reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRequest {
    pub title: String,
    pub details: Option<String>,
    pub category: String,
    pub start_date: Option<String>,
    pub due_date: Option<String>,
    pub assign_to: Option<String>,
    pub outcomes: Vec<TaskOutcome>,
    pub object_ref_urn: String,
}

/// One row of the bulk user-account listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserAccount {
    pub user_id: String,
    pub login_id: String,
    pub employee_id: String,
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub attrib1: String,
    pub class: String,
}

impl UserAccount {
    pub fn from_fields(fields: &Fields) -> Self {
        let get = |column: &str| fields.get(column).cloned().unwrap_or_default();
        Self {
            user_id: get("h_user_id"),
            login_id: get("h_login_id"),
            employee_id: get("h_employee_id"),
            name: get("h_name"),
            first_name: get("h_first_name"),
            last_name: get("h_last_name"),
            email: get("h_email"),
            attrib1: get("h_attrib_1"),
            class: get("h_class"),
        }
    }

    /// Value of the configured unique column; unknown selectors fall back to the user id.
    pub fn unique_value(&self, column: &str) -> &str {
        match column {
            "h_employee_id" => &self.employee_id,
            "h_login_id" => &self.login_id,
            "h_email" => &self.email,
            "h_name" => &self.name,
            "h_attrib_1" => &self.attrib1,
            _ => &self.user_id,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn is_analyst(&self) -> bool {
        self.class == "1"
    }
}

/// Which remote entity shape customers are looked up through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomerKind {
    #[default]
    #[serde(rename = "0")]
    User,
    #[serde(rename = "1")]
    Contact,
}

impl CustomerKind {
    pub fn as_param(self) -> &'static str {
        match self {
            CustomerKind::User => "0",
            CustomerKind::Contact => "1",
        }
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("{service}::{method} failed: {message}")]
    Method {
        service: String,
        method: String,
        message: String,
    },
    #[error("unreadable response: {0}")]
    Decode(String),
    #[error("response is missing {0}")]
    MissingField(&'static str),
}

/// Narrow view of the remote system that the migration core depends on.
///
/// Every call may fail independently; callers treat a failure as "this unit of
/// work did not complete".
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Create a record; returns the primary reference when the entity has one.
    async fn create(&self, entity: &str, record: &EntityRecord) -> Result<Option<String>, RemoteError>;

    /// Update the record identified by `key`.
    async fn update(&self, entity: &str, key: &str, fields: &Fields) -> Result<(), RemoteError>;

    /// Exact-match search returning at most one row.
    async fn search(&self, entity: &str, column: &str, value: &str) -> Result<Option<Fields>, RemoteError>;

    async fn code_lookup(&self, code_group: &str, code: &str) -> Result<Option<ProfileCode>, RemoteError>;

    /// Spawn a workflow process against a request; returns the process identifier.
    async fn spawn_workflow(&self, name: &str, request_ref: &str) -> Result<String, RemoteError>;

    /// Attach a file to a request; returns the content location.
    async fn upload_file(&self, request_ref: &str, file_name: &str, bytes: &[u8]) -> Result<String, RemoteError>;

    async fn post_activity(&self, request_ref: &str, content: &str) -> Result<(), RemoteError>;

    async fn hold_request(&self, request_ref: &str, hold_until: &str, reason: &str) -> Result<(), RemoteError>;

    /// Create a task; returns the task id.
    async fn create_task(&self, task: &TaskRequest) -> Result<String, RemoteError>;

    async fn complete_task(&self, task_id: &str, outcome: &str) -> Result<(), RemoteError>;

    /// Full name of an analyst account, if it exists.
    async fn user_info(&self, user_id: &str) -> Result<Option<String>, RemoteError>;

    /// Display name of a customer, if it exists.
    async fn customer_info(&self, customer_id: &str, kind: CustomerKind) -> Result<Option<String>, RemoteError>;

    async fn user_list_page(&self, offset: usize, limit: usize) -> Result<Vec<UserAccount>, RemoteError>;

    async fn app_setting(&self, name: &str) -> Result<Option<String>, RemoteError>;
}
