//! `ssync transition` — move one entity to a new status.
//!
//! The target status is parsed before anything is sent. The entity is then
//! fetched so validation runs against the server's current status, and the
//! engine rejects disallowed moves without sending the change.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use solarsync_core::Synchronizer;
use solarsync_core::error::{ErrorCode, SyncError};
use solarsync_core::model::{EntityKind, EntityRef, Lifecycle};
use solarsync_core::workflow::{StatusHistoryEntry, TransitionRequest, WorkflowEngine};
use std::io::{self, Write};
use tracing::info;

use super::KindArg;
use crate::output::{OutputMode, pretty_kv, render_mode};

#[derive(Args, Debug)]
pub struct TransitionArgs {
    #[arg(value_enum)]
    pub kind: KindArg,

    /// Entity id.
    pub id: String,

    /// Target status, e.g. `in_progress` or `submitted`.
    pub status: String,

    /// Reason recorded with the change.
    #[arg(long)]
    pub reason: Option<String>,

    /// Ask the server to notify stakeholders.
    #[arg(long)]
    pub notify: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionView {
    pub entity: EntityRef,
    pub from: &'static str,
    pub to: &'static str,
    pub history_entry: StatusHistoryEntry,
}

/// Parse a target status for `S`, reporting unknown text as a validation error.
pub fn parse_target<S: Lifecycle>(raw: &str) -> Result<S, SyncError> {
    raw.parse::<S>()
        .map_err(|err| SyncError::validation(ErrorCode::UnknownStatus, err.to_string()))
}

async fn transition<S: Lifecycle>(
    sync: &Synchronizer,
    engine: &WorkflowEngine<S>,
    args: &TransitionArgs,
) -> Result<TransitionView> {
    let target = parse_target::<S>(&args.status)?;
    let entity = EntityRef::new(S::KIND, args.id.as_str());
    sync.fetch_entity(&entity).await?;

    let request = TransitionRequest::new(args.reason.clone(), args.notify);
    let outcome = engine.request_transition(&entity.id, target, request).await?;
    Ok(TransitionView {
        entity: outcome.entity,
        from: outcome.from.as_str(),
        to: outcome.to.as_str(),
        history_entry: outcome.history_entry,
    })
}

pub async fn run_transition(args: &TransitionArgs, sync: &Synchronizer, output: OutputMode) -> Result<()> {
    let view = match EntityKind::from(args.kind) {
        EntityKind::Project => transition(sync, sync.projects(), args).await?,
        EntityKind::DailyReport => transition(sync, sync.daily_reports(), args).await?,
    };
    info!(entity = %view.entity, from = view.from, to = view.to, "transition committed");
    render_mode(output, &view, write_text, write_pretty)
}

fn write_text(view: &TransitionView, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{}\t{}\t{}", view.entity, view.from, view.to)
}

fn write_pretty(view: &TransitionView, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "✓ {} moved from {} to {}", view.entity, view.from, view.to)?;
    if let Some(reason) = &view.history_entry.reason {
        pretty_kv(w, "Reason", reason)?;
    }
    if let Some(days) = view.history_entry.duration_days {
        pretty_kv(w, "Time in prior", format!("{days} day(s)"))?;
    }
    Ok(())
}
