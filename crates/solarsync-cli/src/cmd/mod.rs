pub mod bulk;
pub mod completions;
pub mod config;
pub mod transition;
pub mod watch;
pub mod workflow;

use anyhow::{Context, Result};
use clap::ValueEnum;
use solarsync_core::config::EffectiveConfig;
use solarsync_core::model::EntityKind;
use solarsync_core::{SyncContext, Synchronizer};
use std::sync::Arc;

use crate::auth;
use crate::http::HttpClient;

/// Entity kind as spelled on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    #[value(alias = "project")]
    Projects,
    #[value(alias = "daily-report", alias = "reports")]
    DailyReports,
}

impl From<KindArg> for EntityKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Projects => Self::Project,
            KindArg::DailyReports => Self::DailyReport,
        }
    }
}

/// Wire the core to the HTTP API using the resolved configuration.
pub fn connect(effective: &EffectiveConfig, user_flag: Option<&str>) -> Result<Synchronizer> {
    let auth = Arc::new(auth::resolve_auth(user_flag, effective.user.user.as_deref()));
    let client = HttpClient::new(&effective.sync.api, auth.clone())?;
    Synchronizer::init(SyncContext::new(
        Arc::new(client),
        auth,
        effective.sync.clone(),
    ))
    .context("Built-in status graphs are invalid")
}
