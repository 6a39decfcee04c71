#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use casemig_core::{SourceRow, PARENT_KEY_COLUMN, SOURCE_GUID_COLUMN, SOURCE_KEY_COLUMN};
use casemig_pipeline::{ImportConfig, MigrationContext, RunOptions};
use casemig_remote::{
    CustomerKind, EntityRecord, Fields, ProfileCode, RemoteError, RemoteSession, TaskRequest, UserAccount,
};
use casemig_source::MemorySource;
use tokio::sync::Mutex;

pub const INCIDENT_SQL: &str = "SELECT * FROM incident";
pub const TASK_SQL: &str = "SELECT * FROM sc_task";

pub const CONFIG: &str = r#"{
    "HBConf": {"InstanceID": "acme", "APIKey": "k"},
    "CustomerUniqueColumn": "h_user_id",
    "AnalystUniqueColumn": "h_user_id",
    "ConfIncident": {
        "Import": true,
        "DefaultPriority": "Medium",
        "DefaultTeam": "Service Desk",
        "DefaultSite": "London",
        "SQLStatement": {"1": "SELECT *", "2": "FROM incident"},
        "CoreFieldMapping": {
            "h_summary": "[short_description]",
            "h_status": "[state]",
            "h_fk_priorityid": "[priority]",
            "h_fk_serviceid": "[service]",
            "h_dateclosed": "[closed_at]",
            "h_datelogged": "[opened_at]",
            "h_fk_team_id": "[assignment_group]",
            "h_site_id": "[location]",
            "h_category_id": "[category]",
            "h_closure_category_id": "[close_code]",
            "h_ownerid": "[assigned_to]",
            "h_fk_user_id": "[caller_id]"
        },
        "AdditionalFieldMapping": {"h_custom_a": "[u_reference]"},
        "StatusMapping": {"1": "status.open", "6": "status.resolved", "3": "status.onHold", "8": "status.cancelled"},
        "PriorityMapping": {"1": "High", "3": "Medium"},
        "ServiceMapping": {"email": "Email"}
    },
    "TeamMapping": {"network-ops": "Network", "retired-team": "Disbanded"},
    "SiteMapping": {"LDN": "London"},
    "CategoryMapping": {"hw": "hardware", "legacy": "no-longer-used"},
    "ResolutionCategoryMapping": {"fixed": "fixed"},
    "ConfActivities": {
        "Import": true,
        "SQLStatement": {"1": "SELECT * FROM sc_task"},
        "ParentRef": "[parent]",
        "Title": "[short_description]",
        "Description": "[description]",
        "Category": "[category]",
        "StartDate": "[opened_at]",
        "DueDate": "[due_date]",
        "AssignTo": "[assigned_to]",
        "Status": "[state]",
        "Decision": "[decision]",
        "Reason": "[reason]"
    }
}"#;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create { entity: String, fields: Fields },
    Update { key: String, fields: Fields },
    Search { entity: String, value: String },
    Spawn { workflow: String, request: String },
    Upload { request: String, file: String, bytes: Vec<u8> },
    Activity { request: String },
    Hold { request: String, until: String, reason: String },
    Task(TaskRequest),
    Complete { task: String, outcome: String },
}

/// Remote double that records every call and tracks concurrent request creates.
#[derive(Default)]
pub struct RecordingRemote {
    calls: Mutex<Vec<Call>>,
    sequence: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    failing_summaries: HashSet<String>,
    panicking_summaries: HashSet<String>,
    create_delay: Duration,
}

impl RecordingRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, summary: &str) -> Self {
        self.failing_summaries.insert(summary.to_string());
        self
    }

    /// Make the create for `summary` panic inside its worker task.
    pub fn panicking_on(mut self, summary: &str) -> Self {
        self.panicking_summaries.insert(summary.to_string());
        self
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub async fn created(&self, entity: &str) -> Vec<Fields> {
        self.calls()
            .await
            .into_iter()
            .filter_map(|call| match call {
                Call::Create { entity: e, fields } if e == entity => Some(fields),
                _ => None,
            })
            .collect()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn log(&self, call: Call) {
        self.calls.lock().await.push(call);
    }

    fn next(&self) -> usize {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }
}

fn fields(pairs: &[(&str, &str)]) -> Fields {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[async_trait]
impl RemoteSession for RecordingRemote {
    async fn create(&self, entity: &str, record: &EntityRecord) -> Result<Option<String>, RemoteError> {
        self.log(Call::Create {
            entity: entity.to_string(),
            fields: record.primary.clone(),
        })
        .await;
        if entity != "Requests" {
            return Ok(Some(format!("{entity}-{}", self.next())));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let summary = record.primary.get("h_summary").cloned().unwrap_or_default();
        if self.panicking_summaries.contains(&summary) {
            panic!("create exploded for {summary}");
        }
        if self.failing_summaries.contains(&summary) {
            return Err(RemoteError::Method {
                service: "data".into(),
                method: "entityAddRecord".into(),
                message: "rejected".into(),
            });
        }
        Ok(Some(format!("IN{:05}", self.next())))
    }

    async fn update(&self, _entity: &str, key: &str, fields: &Fields) -> Result<(), RemoteError> {
        self.log(Call::Update {
            key: key.to_string(),
            fields: fields.clone(),
        })
        .await;
        Ok(())
    }

    async fn search(&self, entity: &str, _column: &str, value: &str) -> Result<Option<Fields>, RemoteError> {
        self.log(Call::Search {
            entity: entity.to_string(),
            value: value.to_string(),
        })
        .await;
        let hit = match (entity, value.to_lowercase().as_str()) {
            ("Priority", "high") => Some(fields(&[("h_pk_priorityid", "P-HIGH"), ("h_priorityname", "High")])),
            ("Priority", "medium") => Some(fields(&[("h_pk_priorityid", "P-MED"), ("h_priorityname", "Medium")])),
            ("Services", "email") => Some(fields(&[
                ("h_pk_serviceid", "7"),
                ("h_servicename", "Email"),
                ("h_incident_bpm_name", "wf-incident"),
            ])),
            ("Groups", "service desk") => Some(fields(&[("h_id", "G-SD"), ("h_name", "Service Desk")])),
            ("Groups", "network") => Some(fields(&[("h_id", "G-NET"), ("h_name", "Network")])),
            ("Site", "london") => Some(fields(&[("h_id", "12"), ("h_site_name", "London")])),
            _ => None,
        };
        Ok(hit)
    }

    async fn code_lookup(&self, code_group: &str, code: &str) -> Result<Option<ProfileCode>, RemoteError> {
        let known = match (code_group, code) {
            ("Request", "hardware") => Some(("CAT-HW", "Hardware")),
            ("Closure", "fixed") => Some(("CLO-FIX", "Fixed")),
            _ => None,
        };
        Ok(known.map(|(id, name)| ProfileCode {
            id: id.to_string(),
            name: name.to_string(),
        }))
    }

    async fn spawn_workflow(&self, name: &str, request_ref: &str) -> Result<String, RemoteError> {
        self.log(Call::Spawn {
            workflow: name.to_string(),
            request: request_ref.to_string(),
        })
        .await;
        Ok(format!("bpm-{request_ref}"))
    }

    async fn upload_file(&self, request_ref: &str, file_name: &str, bytes: &[u8]) -> Result<String, RemoteError> {
        self.log(Call::Upload {
            request: request_ref.to_string(),
            file: file_name.to_string(),
            bytes: bytes.to_vec(),
        })
        .await;
        Ok(format!("/attachments/{request_ref}/{file_name}"))
    }

    async fn post_activity(&self, request_ref: &str, _content: &str) -> Result<(), RemoteError> {
        self.log(Call::Activity {
            request: request_ref.to_string(),
        })
        .await;
        Ok(())
    }

    async fn hold_request(&self, request_ref: &str, hold_until: &str, reason: &str) -> Result<(), RemoteError> {
        self.log(Call::Hold {
            request: request_ref.to_string(),
            until: hold_until.to_string(),
            reason: reason.to_string(),
        })
        .await;
        Ok(())
    }

    async fn create_task(&self, task: &TaskRequest) -> Result<String, RemoteError> {
        self.log(Call::Task(task.clone())).await;
        Ok(format!("TSK{}", self.next()))
    }

    async fn complete_task(&self, task_id: &str, outcome: &str) -> Result<(), RemoteError> {
        self.log(Call::Complete {
            task: task_id.to_string(),
            outcome: outcome.to_string(),
        })
        .await;
        Ok(())
    }

    async fn user_info(&self, user_id: &str) -> Result<Option<String>, RemoteError> {
        Ok((user_id == "analyst1").then(|| "Ann Analyst".to_string()))
    }

    async fn customer_info(&self, customer_id: &str, _kind: CustomerKind) -> Result<Option<String>, RemoteError> {
        Ok((customer_id == "cust1").then(|| "Carl Customer".to_string()))
    }

    async fn user_list_page(&self, offset: usize, _limit: usize) -> Result<Vec<UserAccount>, RemoteError> {
        if offset > 0 {
            return Ok(Vec::new());
        }
        Ok(vec![UserAccount {
            user_id: "preloaded1".into(),
            login_id: "pat.p".into(),
            name: "Pat Preloaded".into(),
            first_name: "Pat".into(),
            last_name: "Preloaded".into(),
            class: "1".into(),
            ..UserAccount::default()
        }])
    }

    async fn app_setting(&self, _name: &str) -> Result<Option<String>, RemoteError> {
        Ok(Some("INC".to_string()))
    }
}

pub fn incident(key: &str, summary: &str, state: &str) -> SourceRow {
    SourceRow::new()
        .with(SOURCE_KEY_COLUMN, key)
        .with(SOURCE_GUID_COLUMN, format!("guid-{key}"))
        .with("short_description", summary)
        .with("state", state)
        .with("priority", "1")
        .with("service", "email")
        .with("opened_at", "2024-01-01 08:00:00")
}

pub fn child_of(row: SourceRow, parent_key: &str) -> SourceRow {
    row.with(PARENT_KEY_COLUMN, parent_key)
}

pub fn options(concurrency: usize) -> RunOptions {
    RunOptions {
        concurrency,
        ..RunOptions::default()
    }
}

pub fn context(options: RunOptions, remote: &Arc<RecordingRemote>, source: MemorySource) -> Arc<MigrationContext> {
    let config = ImportConfig::from_json_str(CONFIG).unwrap();
    let remote: Arc<dyn RemoteSession> = remote.clone();
    Arc::new(MigrationContext::new(config, options, remote, Arc::new(source)))
}
