//! Import configuration file model and run options.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use casemig_core::{FieldMapping, RequestClass};
use casemig_remote::{instance_url, CustomerKind};
use casemig_source::SourceDbConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("concurrency must be between 1 and 10, got {0}")]
    ConcurrencyOutOfRange(usize),
    #[error("reading config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("parsing YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("`{0}` is not set in the configuration")]
    Missing(&'static str),
    #[error("source database: {0}")]
    Source(#[from] casemig_source::SourceError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    #[serde(rename = "InstanceID")]
    pub instance_id: String,
    #[serde(rename = "APIKey")]
    pub api_key: String,
    /// Full endpoint override; when empty the endpoint is derived from zone + instance.
    #[serde(rename = "URL")]
    pub url: String,
}

impl InstanceConfig {
    pub fn endpoint(&self, zone: &str) -> String {
        if self.url.is_empty() {
            instance_url(zone, &self.instance_id)
        } else {
            self.url.clone()
        }
    }
}

/// Per request-class import settings (`ConfIncident`, `ConfServiceRequest`, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RequestClassConfig {
    pub import: bool,
    pub default_team: String,
    pub default_priority: String,
    pub default_service: String,
    pub default_site: String,
    #[serde(rename = "SQLStatement")]
    pub sql_statement: BTreeMap<String, String>,
    pub core_field_mapping: BTreeMap<String, FieldMapping>,
    pub additional_field_mapping: BTreeMap<String, FieldMapping>,
    pub status_mapping: BTreeMap<String, String>,
    pub priority_mapping: BTreeMap<String, String>,
    pub service_mapping: BTreeMap<String, String>,
}

impl RequestClassConfig {
    pub fn mapping(&self, field: &str) -> Option<&FieldMapping> {
        self.core_field_mapping.get(field).filter(|m| !m.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ActivityConfig {
    pub import: bool,
    #[serde(rename = "SQLStatement")]
    pub sql_statement: BTreeMap<String, String>,
    pub parent_ref: FieldMapping,
    pub title: FieldMapping,
    pub description: FieldMapping,
    pub category: FieldMapping,
    pub start_date: FieldMapping,
    pub due_date: FieldMapping,
    pub assign_to: FieldMapping,
    pub status: FieldMapping,
    pub decision: FieldMapping,
    pub reason: FieldMapping,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ImportConfig {
    #[serde(rename = "HBConf")]
    pub instance: InstanceConfig,
    pub customer_type: CustomerKind,
    pub customer_unique_column: String,
    pub analyst_unique_column: String,
    #[serde(rename = "SNAppDBConf")]
    pub source_db: SourceDbConfig,
    pub conf_incident: RequestClassConfig,
    pub conf_service_request: RequestClassConfig,
    pub conf_change_request: RequestClassConfig,
    pub conf_problem: RequestClassConfig,
    pub conf_known_error: RequestClassConfig,
    pub conf_release: RequestClassConfig,
    pub conf_activities: ActivityConfig,
    pub team_mapping: BTreeMap<String, String>,
    pub site_mapping: BTreeMap<String, String>,
    pub category_mapping: BTreeMap<String, String>,
    pub resolution_category_mapping: BTreeMap<String, String>,
}

impl ImportConfig {
    /// Load a config file; `.yaml`/`.yml` files are read as YAML, everything else as JSON.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "yaml" | "yml"))
            .unwrap_or(false);
        if is_yaml {
            Self::from_yaml_str(&text)
        } else {
            Self::from_json_str(&text)
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn class(&self, class: RequestClass) -> &RequestClassConfig {
        match class {
            RequestClass::Incident => &self.conf_incident,
            RequestClass::ServiceRequest => &self.conf_service_request,
            RequestClass::ChangeRequest => &self.conf_change_request,
            RequestClass::Problem => &self.conf_problem,
            RequestClass::KnownError => &self.conf_known_error,
            RequestClass::Release => &self.conf_release,
        }
    }

    pub fn enabled_classes(&self) -> Vec<RequestClass> {
        RequestClass::ALL
            .into_iter()
            .filter(|class| self.class(*class).import)
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instance.instance_id.is_empty() && self.instance.url.is_empty() {
            return Err(ConfigError::Missing("HBConf.InstanceID"));
        }
        if self.instance.api_key.is_empty() {
            return Err(ConfigError::Missing("HBConf.APIKey"));
        }
        self.source_db.connection_url()?;
        Ok(())
    }
}

/// Look up `key` in a translation table: exact match first, then case-insensitive.
pub fn translate<'a>(table: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    if key.is_empty() {
        return None;
    }
    table
        .get(key)
        .or_else(|| {
            table
                .iter()
                .find(|(candidate, _)| candidate.eq_ignore_ascii_case(key))
                .map(|(_, value)| value)
        })
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub config_path: PathBuf,
    pub zone: String,
    pub dry_run: bool,
    pub concurrency: usize,
    pub attachments: bool,
    pub call_delay: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("conf.json"),
            zone: "eur".to_string(),
            dry_run: false,
            concurrency: 1,
            attachments: true,
            call_delay: Duration::from_millis(150),
        }
    }
}

impl RunOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.concurrency) {
            return Err(ConfigError::ConcurrencyOutOfRange(self.concurrency));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "HBConf": {"InstanceID": "acme", "APIKey": "abc123"},
        "CustomerType": "1",
        "CustomerUniqueColumn": "h_email",
        "SNAppDBConf": {"Driver": "mysql", "Server": "db", "Database": "sn", "UserName": "u", "Password": "p", "Port": 3306},
        "ConfIncident": {
            "Import": true,
            "DefaultTeam": "Service Desk",
            "SQLStatement": {"1": "SELECT *", "2": "FROM incident"},
            "CoreFieldMapping": {"h_summary": "[short_description]", "h_status": "[state]"},
            "StatusMapping": {"1": "status.open"}
        },
        "ConfProblem": {"Import": false},
        "TeamMapping": {"abc": "Service Desk"}
    }"#;

    #[test]
    fn parses_pascal_case_document() {
        let config = ImportConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(config.instance.instance_id, "acme");
        assert_eq!(config.customer_type, CustomerKind::Contact);
        assert_eq!(config.enabled_classes(), vec![RequestClass::Incident]);
        let incident = config.class(RequestClass::Incident);
        assert_eq!(incident.default_team, "Service Desk");
        assert_eq!(
            incident.mapping("h_summary").map(FieldMapping::as_str),
            Some("[short_description]")
        );
        assert!(incident.mapping("h_missing").is_none());
        assert!(config.validate().is_ok());
        assert_eq!(config.instance.endpoint("eur"), "https://eurapi.hornbill.com/acme/xmlmc/");
    }

    #[test]
    fn yaml_files_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf.yaml");
        std::fs::write(
            &path,
            "HBConf:\n  InstanceID: acme\n  APIKey: k\nConfRelease:\n  Import: true\n",
        )
        .unwrap();
        let config = ImportConfig::load(&path).unwrap();
        assert_eq!(config.enabled_classes(), vec![RequestClass::Release]);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ImportConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn concurrency_bounds_are_enforced() {
        let mut options = RunOptions::default();
        assert!(options.validate().is_ok());
        options.concurrency = 10;
        assert!(options.validate().is_ok());
        options.concurrency = 0;
        assert!(matches!(options.validate(), Err(ConfigError::ConcurrencyOutOfRange(0))));
        options.concurrency = 11;
        assert!(options.validate().is_err());
    }

    #[test]
    fn translation_prefers_exact_then_case_insensitive() {
        let table: BTreeMap<String, String> = [("High", "P1"), ("high", "P2"), ("Low", "")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(translate(&table, "high"), Some("P2"));
        assert_eq!(translate(&table, "HIGH"), Some("P1"));
        assert_eq!(translate(&table, "Low"), None);
        assert_eq!(translate(&table, ""), None);
    }
}
