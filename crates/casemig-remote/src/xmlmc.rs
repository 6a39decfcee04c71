use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{
    request_urn, CustomerKind, EntityRecord, Fields, ProfileCode, RemoteError, RemoteSession,
    TaskRequest, UserAccount, APP_CORE, APP_SERVICE_MANAGER,
};

const REQUESTS_SERVICE: &str = "apps/com.hornbill.servicemanager/Requests";

/// Instance endpoint for a zone-qualified tenant, e.g. `eur` + `acme`.
pub fn instance_url(zone: &str, instance: &str) -> String {
    format!("https://{zone}api.hornbill.com/{instance}/xmlmc/")
}

#[derive(Debug, Clone)]
pub struct XmlmcConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Pause before every method call.
    pub call_delay: Duration,
    pub timeout: Duration,
    pub user_agent: String,
}

impl XmlmcConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            call_delay: Duration::from_millis(150),
            timeout: Duration::from_secs(60),
            user_agent: format!("casemig/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }
}

/// Builder for one `<methodCall>` document.
#[derive(Debug, Clone)]
pub struct MethodCall {
    service: String,
    method: String,
    body: String,
    open: Vec<String>,
}

impl MethodCall {
    pub fn new(service: &str, method: &str) -> Self {
        Self {
            service: service.to_string(),
            method: method.to_string(),
            body: String::new(),
            open: Vec::new(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn param(&mut self, name: &str, value: &str) -> &mut Self {
        self.body.push_str(&format!("<{name}>{}</{name}>", escape_xml(value)));
        self
    }

    pub fn open(&mut self, name: &str) -> &mut Self {
        self.body.push_str(&format!("<{name}>"));
        self.open.push(name.to_string());
        self
    }

    pub fn close(&mut self) -> &mut Self {
        if let Some(name) = self.open.pop() {
            self.body.push_str(&format!("</{name}>"));
        }
        self
    }

    /// Serialized document; any element still open is closed.
    pub fn to_xml(&self) -> String {
        let mut body = self.body.clone();
        for name in self.open.iter().rev() {
            body.push_str(&format!("</{name}>"));
        }
        format!(
            "<methodCall service=\"{}\" method=\"{}\"><params>{body}</params></methodCall>",
            escape_xml(&self.service),
            escape_xml(&self.method)
        )
    }
}

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Successful method response; holds the `params` object.
#[derive(Debug, Clone, Default)]
pub struct MethodResponse {
    params: JsonValue,
}

impl MethodResponse {
    pub fn params(&self) -> &JsonValue {
        &self.params
    }

    /// Non-empty scalar at `path` under `params`, stringified.
    pub fn str_at(&self, path: &[&str]) -> Option<String> {
        let mut cursor = &self.params;
        for key in path {
            cursor = cursor.get(key)?;
        }
        value_to_string(cursor).filter(|value| !value.is_empty())
    }

    /// Rows of a `rowData` result, which arrives as an object for a single row.
    pub fn rows(&self) -> Vec<&JsonValue> {
        match self.params.get("rowData").and_then(|data| data.get("row")) {
            Some(JsonValue::Array(rows)) => rows.iter().collect(),
            Some(row @ JsonValue::Object(_)) => vec![row],
            _ => Vec::new(),
        }
    }
}

fn value_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(text) => Some(text.clone()),
        JsonValue::Number(number) => Some(number.to_string()),
        JsonValue::Bool(flag) => Some(flag.to_string()),
        other => Some(other.to_string()),
    }
}

fn fields_from_row(row: &JsonValue) -> Fields {
    row.as_object()
        .map(|object| {
            object
                .iter()
                .filter_map(|(key, value)| value_to_string(value).map(|text| (key.clone(), text)))
                .collect()
        })
        .unwrap_or_default()
}

/// Decode a JSON method response, turning `@status: false` into a method error.
pub fn parse_response(service: &str, method: &str, body: &str) -> Result<MethodResponse, RemoteError> {
    let document: JsonValue =
        serde_json::from_str(body).map_err(|err| RemoteError::Decode(format!("{service}::{method}: {err}")))?;

    let ok = match document.get("@status") {
        Some(JsonValue::Bool(flag)) => *flag,
        Some(JsonValue::String(text)) => text.eq_ignore_ascii_case("ok") || text == "true",
        _ => false,
    };
    if !ok {
        let message = document
            .get("state")
            .and_then(|state| state.get("error").or_else(|| state.get("code")))
            .and_then(value_to_string)
            .unwrap_or_else(|| "unknown error".to_string());
        return Err(RemoteError::Method {
            service: service.to_string(),
            method: method.to_string(),
            message,
        });
    }

    Ok(MethodResponse {
        params: document.get("params").cloned().unwrap_or(JsonValue::Null),
    })
}

/// Site and Groups are core entities and take no application parameter.
fn application_for(entity: &str) -> Option<&'static str> {
    match entity {
        "Site" | "Groups" => None,
        _ => Some(APP_SERVICE_MANAGER),
    }
}

pub struct XmlmcClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    call_delay: Duration,
}

impl XmlmcClient {
    pub fn new(config: XmlmcConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.timeout)
            .build()?;
        let mut endpoint = config.endpoint;
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key,
            call_delay: config.call_delay,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn invoke(&self, call: &MethodCall) -> Result<MethodResponse, RemoteError> {
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }

        let url = format!("{}{}/?method={}", self.endpoint, call.service(), call.method());
        debug!(service = call.service(), method = call.method(), "xmlmc call");

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "text/xmlmc")
            .header(ACCEPT, "text/json")
            .header(AUTHORIZATION, format!("ESP-APIKEY {}", self.api_key))
            .body(call.to_xml())
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // Method failures are sometimes reported with a 4xx/5xx status and a JSON body.
            return match parse_response(call.service(), call.method(), &body) {
                Err(err @ RemoteError::Method { .. }) => Err(err),
                _ => Err(RemoteError::HttpStatus {
                    status: status.as_u16(),
                    url,
                }),
            };
        }
        parse_response(call.service(), call.method(), &body)
    }
}

fn push_fields(call: &mut MethodCall, fields: &Fields) {
    for (column, value) in fields {
        call.param(column, value);
    }
}

#[async_trait]
impl RemoteSession for XmlmcClient {
    async fn create(&self, entity: &str, record: &EntityRecord) -> Result<Option<String>, RemoteError> {
        let mut call = MethodCall::new("data", "entityAddRecord");
        if let Some(app) = application_for(entity) {
            call.param("application", app);
        }
        call.param("entity", entity).param("returnModifiedData", "true");
        call.open("primaryEntityData").open("record");
        push_fields(&mut call, &record.primary);
        call.close().close();
        for related in &record.related {
            call.open("relatedEntityData")
                .param("relationshipName", &related.relationship)
                .param("entityAction", "insert")
                .open("record");
            push_fields(&mut call, &related.fields);
            call.close().close();
        }

        let response = self.invoke(&call).await?;
        Ok(response.str_at(&["primaryEntityData", "record", "h_pk_reference"]))
    }

    async fn update(&self, entity: &str, key: &str, fields: &Fields) -> Result<(), RemoteError> {
        let mut call = MethodCall::new("data", "entityUpdateRecord");
        if let Some(app) = application_for(entity) {
            call.param("application", app);
        }
        call.param("entity", entity);
        call.open("primaryEntityData").open("record");
        call.param("h_pk_reference", key);
        push_fields(&mut call, fields);
        call.close().close();
        self.invoke(&call).await?;
        Ok(())
    }

    async fn search(&self, entity: &str, column: &str, value: &str) -> Result<Option<Fields>, RemoteError> {
        let mut call = MethodCall::new("data", "entityBrowseRecords");
        if let Some(app) = application_for(entity) {
            call.param("application", app);
        }
        call.param("entity", entity).param("matchScope", "all");
        call.open("searchFilter").param(column, value).close();
        call.param("maxResults", "1");

        let response = self.invoke(&call).await?;
        Ok(response.rows().first().map(|row| fields_from_row(row)))
    }

    async fn code_lookup(&self, code_group: &str, code: &str) -> Result<Option<ProfileCode>, RemoteError> {
        let mut call = MethodCall::new("data", "profileCodeLookup");
        call.param("codeGroup", code_group).param("code", code);
        let response = self.invoke(&call).await?;
        Ok(match (response.str_at(&["id"]), response.str_at(&["fullname"])) {
            (Some(id), Some(name)) => Some(ProfileCode { id, name }),
            _ => None,
        })
    }

    async fn spawn_workflow(&self, name: &str, request_ref: &str) -> Result<String, RemoteError> {
        let mut call = MethodCall::new("bpm", "processSpawn");
        call.param("application", APP_SERVICE_MANAGER).param("name", name);
        call.open("inputParams")
            .param("objectRefUrn", &request_urn(request_ref))
            .param("requestId", request_ref)
            .close();
        let response = self.invoke(&call).await?;
        response
            .str_at(&["identifier"])
            .ok_or(RemoteError::MissingField("identifier"))
    }

    async fn upload_file(&self, request_ref: &str, file_name: &str, bytes: &[u8]) -> Result<String, RemoteError> {
        let mut call = MethodCall::new("data", "entityAttachFile");
        call.param("application", APP_SERVICE_MANAGER)
            .param("entity", "Requests")
            .param("keyValue", request_ref)
            .param("folder", "/");
        call.open("localFile")
            .param("fileName", file_name)
            .param("fileData", &BASE64.encode(bytes))
            .close();
        call.param("overwrite", "true");
        let response = self.invoke(&call).await?;
        Ok(response.str_at(&["contentLocation"]).unwrap_or_default())
    }

    async fn post_activity(&self, request_ref: &str, content: &str) -> Result<(), RemoteError> {
        let mut call = MethodCall::new("activity", "postMessage");
        call.param("socialObjectRef", &request_urn(request_ref))
            .param("content", content)
            .param("visibility", "public")
            .param("type", "Logged");
        self.invoke(&call).await?;
        Ok(())
    }

    async fn hold_request(&self, request_ref: &str, hold_until: &str, reason: &str) -> Result<(), RemoteError> {
        let mut call = MethodCall::new(REQUESTS_SERVICE, "holdRequest");
        call.param("requestId", request_ref)
            .param("onHoldUntil", hold_until)
            .param("strReason", reason);
        self.invoke(&call).await?;
        Ok(())
    }

    async fn create_task(&self, task: &TaskRequest) -> Result<String, RemoteError> {
        let mut call = MethodCall::new("task", "taskCreate2");
        call.param("application", APP_SERVICE_MANAGER)
            .param("title", &task.title);
        if let Some(details) = &task.details {
            call.param("details", details);
        }
        call.param("category", &task.category);
        if let Some(start) = &task.start_date {
            call.param("startDate", start);
        }
        if let Some(due) = &task.due_date {
            call.param("dueDate", due);
        }
        if let Some(assignee) = &task.assign_to {
            call.param("assignTo", assignee);
        }
        for outcome in &task.outcomes {
            call.open("outcome").param("outcome", &outcome.outcome);
            call.open("displayName").param("text", &outcome.display_name).close();
            call.param("buttonColor", "default")
                .param("requiresReason", if outcome.requires_reason { "true" } else { "false" })
                .close();
        }
        call.param("objectRefUrn", &task.object_ref_urn)
            .param("remindAssignee", "false")
            .param("remindOwner", "false");

        let response = self.invoke(&call).await?;
        response.str_at(&["taskId"]).ok_or(RemoteError::MissingField("taskId"))
    }

    async fn complete_task(&self, task_id: &str, outcome: &str) -> Result<(), RemoteError> {
        let mut call = MethodCall::new("task", "taskComplete");
        call.param("taskId", task_id).param("outcome", outcome);
        self.invoke(&call).await?;
        Ok(())
    }

    async fn user_info(&self, user_id: &str) -> Result<Option<String>, RemoteError> {
        let mut call = MethodCall::new("admin", "userGetInfo");
        call.param("userId", user_id);
        let response = self.invoke(&call).await?;
        Ok(response.str_at(&["name"]))
    }

    async fn customer_info(&self, customer_id: &str, kind: CustomerKind) -> Result<Option<String>, RemoteError> {
        let mut call = MethodCall::new("apps/com.hornbill.servicemanager", "shrGetCustomerDetails");
        call.param("customerId", customer_id)
            .param("customerType", kind.as_param());
        let response = self.invoke(&call).await?;
        Ok(response.str_at(&["firstName"]).map(|first| {
            match response.str_at(&["lastName"]) {
                Some(last) => format!("{first} {last}"),
                None => first,
            }
        }))
    }

    async fn user_list_page(&self, offset: usize, limit: usize) -> Result<Vec<UserAccount>, RemoteError> {
        let mut call = MethodCall::new("data", "queryExec");
        call.param("application", APP_CORE)
            .param("queryName", "getUserAccountsList");
        call.open("queryParams")
            .param("rowstart", &offset.to_string())
            .param("limit", &limit.to_string())
            .close();
        let response = self.invoke(&call).await?;
        Ok(response
            .rows()
            .into_iter()
            .map(|row| UserAccount::from_fields(&fields_from_row(row)))
            .collect())
    }

    async fn app_setting(&self, name: &str) -> Result<Option<String>, RemoteError> {
        let mut call = MethodCall::new("admin", "appOptionGet");
        call.param("appName", APP_SERVICE_MANAGER)
            .param("filter", name);
        let response = self.invoke(&call).await?;
        let option = match response.params().get("option") {
            Some(JsonValue::Array(options)) => options.iter().find(|option| {
                option.get("key").and_then(JsonValue::as_str).map_or(true, |key| key == name)
            }),
            Some(option @ JsonValue::Object(_)) => Some(option),
            _ => None,
        };
        Ok(option
            .and_then(|option| option.get("value"))
            .and_then(value_to_string)
            .filter(|value| !value.is_empty()))
    }
}
