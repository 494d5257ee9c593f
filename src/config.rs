//! Configuration loader and validator for the clinic booking service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::ReminderMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub data: Data,
    #[serde(default)]
    pub advisory: Advisory,
    #[serde(default)]
    pub email: Option<Email>,
    #[serde(default)]
    pub sms: Option<Sms>,
    #[serde(default)]
    pub booking_links: BookingLinks,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default)]
    pub reminder_mode: ReminderMode,
}

/// Input datasets. Missing files are treated as empty datasets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Data {
    pub patients_file: PathBuf,
    pub schedule_file: PathBuf,
    pub intake_form: PathBuf,
}

/// Language-model advisory settings. An empty `api_key` disables the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Advisory {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_advisory_model")]
    pub model: String,
    #[serde(default = "default_advisory_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for Advisory {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_advisory_model(),
            base_url: default_advisory_url(),
            timeout_seconds: default_timeout_seconds(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// HTTP mail relay settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Email {
    pub from: String,
    pub api_base: String,
    pub domain: String,
    pub api_key: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Text-message API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sms {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    #[serde(default = "default_sms_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Raw booking-link values; resolved to public URLs once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BookingLinks {
    #[serde(default)]
    pub new_patient: String,
    #[serde(default)]
    pub returning_patient: String,
    #[serde(default)]
    pub directory_token: String,
}

fn default_advisory_model() -> String {
    "sonar-pro".to_string()
}

fn default_advisory_url() -> String {
    "https://api.perplexity.ai/".to_string()
}

fn default_sms_api_base() -> String {
    "https://api.twilio.com/".to_string()
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_tokens() -> u32 {
    400
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Default ledger location inside `app.data_dir`.
    pub fn default_database_url(&self) -> String {
        format!(
            "sqlite://{}/appointments.db",
            self.app.data_dir.trim_end_matches('/')
        )
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance. Optional collaborators may be absent,
/// but a section that is present must be complete.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.data.patients_file.as_os_str().is_empty() {
        return Err(ConfigError::Invalid("data.patients_file must be non-empty"));
    }
    if cfg.data.schedule_file.as_os_str().is_empty() {
        return Err(ConfigError::Invalid("data.schedule_file must be non-empty"));
    }

    if cfg.advisory.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("advisory.timeout_seconds must be > 0"));
    }

    if let Some(email) = &cfg.email {
        if email.from.trim().is_empty() {
            return Err(ConfigError::Invalid("email.from must be non-empty"));
        }
        if email.api_base.trim().is_empty() {
            return Err(ConfigError::Invalid("email.api_base must be non-empty"));
        }
        if email.domain.trim().is_empty() {
            return Err(ConfigError::Invalid("email.domain must be non-empty"));
        }
    }

    if let Some(sms) = &cfg.sms {
        if sms.from_number.trim().is_empty() {
            return Err(ConfigError::Invalid("sms.from_number must be non-empty"));
        }
        if sms.api_base.trim().is_empty() {
            return Err(ConfigError::Invalid("sms.api_base must be non-empty"));
        }
    }

    Ok(())
}

/// Returns an example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  # demo: reminders fire 15s/30s/45s after booking
  # production: 24h/6h/1h before the appointment
  reminder_mode: demo

data:
  patients_file: "./data/patients.csv"
  schedule_file: "./data/doctor_schedules.csv"
  intake_form: "./data/New Patient Intake Form.pdf"

advisory:
  api_key: ""
  model: "sonar-pro"

email:
  from: "clinic@example.com"
  api_base: "https://api.mailgun.net/"
  domain: "mg.example.com"
  api_key: "YOUR_MAIL_RELAY_KEY"

sms:
  account_sid: "YOUR_ACCOUNT_SID"
  auth_token: "YOUR_AUTH_TOKEN"
  from_number: "+15550100000"

booking_links:
  new_patient: "https://calendly.com/pragatheesvaranab/new-meeting"
  returning_patient: "https://calendly.com/pragatheesvaranab/30min"
  directory_token: ""
"#
}
