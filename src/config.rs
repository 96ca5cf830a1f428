//! Configuration types.
//!
//! Two layers:
//! - [`RelayConfig`]: the mailbox/webhook settings, read from a JSON file once
//!   per invocation through a [`ConfigSource`].
//! - [`RuntimeSettings`]: process-level knobs (database path, dry-run, time
//!   budget, schedule) read from environment variables at startup.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::SecretString;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::channels::discord::parse_webhook_url;
use crate::error::ConfigError;

/// Default IMAP port with implicit TLS.
pub const IMAPS_PORT: u16 = 993;

/// Default IMAP port without TLS.
pub const IMAP_PORT: u16 = 143;

/// Mailbox and delivery settings for one relay deployment.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub user: String,
    pub password: SecretString,
    pub folder: String,
    pub webhook_url: String,
    pub allow_list: Vec<String>,
    pub deny_list: Vec<String>,
    /// Term → definition; matching terms are attached to notifications.
    pub glossary: BTreeMap<String, String>,
    /// On first sync, record the current position without relaying old mail.
    pub skip_existing: bool,
}

/// On-disk shape of the configuration file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    host: String,
    port: Option<u16>,
    #[serde(default = "default_tls")]
    tls: bool,
    user: String,
    password: String,
    #[serde(default = "default_folder")]
    folder: String,
    #[serde(alias = "discordWebhookUrl")]
    webhook_url: String,
    #[serde(default)]
    allow_list: Vec<String>,
    #[serde(default)]
    deny_list: Vec<String>,
    #[serde(default)]
    glossary: BTreeMap<String, String>,
    #[serde(default)]
    skip_existing: bool,
}

fn default_tls() -> bool {
    true
}

fn default_folder() -> String {
    "INBOX".to_string()
}

impl RelayConfig {
    /// Parse and validate a JSON configuration document.
    ///
    /// `origin` names the document in error messages (usually its path).
    pub fn from_json(body: &str, origin: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            serde_json::from_str(body).map_err(|e| ConfigError::ParseError {
                path: origin.to_string(),
                reason: e.to_string(),
            })?;

        let port = file
            .port
            .unwrap_or(if file.tls { IMAPS_PORT } else { IMAP_PORT });

        let config = Self {
            host: file.host.trim().to_string(),
            port,
            tls: file.tls,
            user: file.user,
            password: SecretString::from(file.password),
            folder: file.folder,
            webhook_url: file.webhook_url.trim().to_string(),
            allow_list: clean_list(file.allow_list),
            deny_list: clean_list(file.deny_list),
            glossary: file.glossary,
            skip_existing: file.skip_existing,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(invalid("host", "must not be empty"));
        }
        if self.user.is_empty() {
            return Err(invalid("user", "must not be empty"));
        }
        if self.folder.is_empty() {
            return Err(invalid("folder", "must not be empty"));
        }
        if self.port == 0 {
            return Err(invalid("port", "must be between 1 and 65535"));
        }
        parse_webhook_url(&self.webhook_url)
            .map_err(|e| invalid("webhookUrl", &e.to_string()))?;
        Ok(())
    }

    /// Fingerprint of (host, user, folder).
    ///
    /// A checkpoint only applies to the mailbox it was recorded against; any
    /// change to these three values invalidates it. The format is
    /// base64(SHA-256(host ‖ user ‖ folder)).
    pub fn mailbox_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for value in [&self.host, &self.user, &self.folder] {
            hasher.update(value.as_bytes());
        }
        STANDARD.encode(hasher.finalize())
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn clean_list(list: Vec<String>) -> Vec<String> {
    list.into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// ── Sources ─────────────────────────────────────────────────────────

/// Where the relay configuration comes from.
///
/// Loaded once per invocation, concurrently with the checkpoint.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load(&self) -> Result<RelayConfig, ConfigError>;
}

/// Reads the configuration from a JSON file on every invocation, so edits
/// take effect on the next scheduled run without a restart.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ConfigSource for FileConfigSource {
    async fn load(&self) -> Result<RelayConfig, ConfigError> {
        let origin = self.path.display().to_string();
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ConfigError::Io {
                path: origin.clone(),
                source,
            })?;
        RelayConfig::from_json(&body, &origin)
    }
}

/// A fixed, already-parsed configuration.
#[derive(Debug, Clone)]
pub struct StaticConfigSource(pub RelayConfig);

#[async_trait]
impl ConfigSource for StaticConfigSource {
    async fn load(&self) -> Result<RelayConfig, ConfigError> {
        Ok(self.0.clone())
    }
}

// ── Runtime settings ────────────────────────────────────────────────

/// Process-level settings, built from environment variables.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Path of the JSON relay configuration.
    pub config_file: PathBuf,
    /// Path of the libSQL checkpoint database.
    pub db_path: PathBuf,
    /// Log notifications instead of posting them. Defaults to on for a
    /// single run and off on a schedule.
    pub dry_run: bool,
    /// Wall-clock allowance of one invocation.
    pub time_budget: Duration,
    /// Stop scanning when less than this much of the budget remains.
    pub safety_margin: Duration,
    /// `None` runs a single invocation; `Some` runs on a schedule.
    pub poll_interval: Option<Duration>,
    /// Directory for daily-rolling log files, if any.
    pub log_dir: Option<PathBuf>,
}

impl RuntimeSettings {
    /// Build settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_file = lookup("RELAY_CONFIG_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./relay.json"));

        let db_path = lookup("RELAY_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/imap-relay.db"));

        let time_budget = parse_secs(&lookup, "RELAY_TIME_BUDGET_SECS")?
            .unwrap_or(Duration::from_secs(300));
        let safety_margin = parse_secs(&lookup, "RELAY_SAFETY_MARGIN_SECS")?
            .unwrap_or(crate::sync::DEFAULT_SAFETY_MARGIN);
        let poll_interval = parse_secs(&lookup, "RELAY_POLL_INTERVAL_SECS")?;

        // A single local run is a dry run unless told otherwise.
        let dry_run = match lookup("DRY_RUN") {
            Some(value) => parse_bool("DRY_RUN", &value)?,
            None => poll_interval.is_none(),
        };

        if safety_margin >= time_budget {
            return Err(invalid(
                "RELAY_SAFETY_MARGIN_SECS",
                "must be smaller than RELAY_TIME_BUDGET_SECS",
            ));
        }
        if poll_interval.is_some_and(|d| d.is_zero()) {
            return Err(invalid("RELAY_POLL_INTERVAL_SECS", "must be greater than 0"));
        }

        let log_dir = lookup("RELAY_LOG_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            config_file,
            db_path,
            dry_run,
            time_budget,
            safety_margin,
            poll_interval,
            log_dir,
        })
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        other => Err(invalid(key, &format!("expected true/false, got \"{other}\""))),
    }
}

fn parse_secs<F>(lookup: &F, key: &str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|e| invalid(key, &e.to_string())),
    }
}
