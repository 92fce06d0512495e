use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::model::EntityKind;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub bulk: BulkConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Send bulk operations as one `POST <resource>/bulk` instead of one
    /// request per entity.
    #[serde(default)]
    pub use_bulk_endpoint: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            use_bulk_endpoint: false,
        }
    }
}

impl ApiConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_projects_interval")]
    pub projects_interval_secs: u64,
    #[serde(default = "default_daily_reports_interval")]
    pub daily_reports_interval_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            projects_interval_secs: default_projects_interval(),
            daily_reports_interval_secs: default_daily_reports_interval(),
        }
    }
}

impl PollConfig {
    /// Timer period for subscriptions on `kind`. Never shorter than one second.
    #[must_use]
    pub fn interval_for(&self, kind: EntityKind) -> Duration {
        let secs = match kind {
            EntityKind::Project => self.projects_interval_secs,
            EntityKind::DailyReport => self.daily_reports_interval_secs,
        };
        Duration::from_secs(secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_notification_cap")]
    pub cap: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            cap: default_notification_cap(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
    /// Overrides the project's `api.base_url`.
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub sync: SyncConfig,
    pub user: UserConfig,
    pub resolved_output: String,
}

pub fn load_project_config(project_root: &Path) -> Result<SyncConfig> {
    let path = project_root.join(".solarsync/config.toml");
    if !path.exists() {
        return Ok(SyncConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<SyncConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("solarsync/config.toml");
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Merge project config, user config and environment.
///
/// API URL precedence: `SOLARSYNC_API_URL` > user `api_url` > project
/// `api.base_url`. `resolved_output` is the output mode the caller already
/// settled on and is recorded as given.
pub fn resolve_config(project_root: &Path, resolved_output: &str) -> Result<EffectiveConfig> {
    let mut sync = load_project_config(project_root)?;
    let user = load_user_config()?;

    let env_url = env::var("SOLARSYNC_API_URL").ok();
    if let Some(url) = resolve_api_url(env_url, user.api_url.clone()) {
        sync.api.base_url = url;
    }

    Ok(EffectiveConfig {
        sync,
        user,
        resolved_output: resolved_output.to_string(),
    })
}

fn resolve_api_url(env_url: Option<String>, user_url: Option<String>) -> Option<String> {
    env_url
        .into_iter()
        .chain(user_url)
        .map(|url| url.trim().trim_end_matches('/').to_string())
        .find(|url| !url.is_empty())
}

fn default_base_url() -> String {
    "http://localhost:3000/api".to_string()
}

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_projects_interval() -> u64 {
    30
}

const fn default_daily_reports_interval() -> u64 {
    5
}

const fn default_notification_cap() -> usize {
    50
}

const fn default_max_concurrency() -> usize {
    8
}
