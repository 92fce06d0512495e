//! `ssync bulk` — repeat one operation across many ids.
//!
//! Exit status is zero only when every id succeeded; the result lists the
//! failed ids so the caller can retry just those.

use anyhow::{Result, bail};
use clap::{Args, ValueEnum};
use futures::future::join_all;
use solarsync_core::Synchronizer;
use solarsync_core::bulk::{BulkCoordinator, BulkFailure, BulkOperation, BulkOperationResult};
use solarsync_core::model::{EntityId, EntityKind, EntityRef, Lifecycle};
use std::io::{self, Write};

use super::KindArg;
use super::transition::parse_target;
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BulkOpArg {
    UpdateStatus,
    AssignManager,
    UpdateTeam,
    Delete,
}

#[derive(Args, Debug)]
pub struct BulkArgs {
    #[arg(value_enum)]
    pub kind: KindArg,

    #[arg(value_enum)]
    pub op: BulkOpArg,

    /// Entity ids to operate on.
    #[arg(required = true)]
    pub ids: Vec<String>,

    /// Target status for `update-status`.
    #[arg(long)]
    pub status: Option<String>,

    /// Manager id for `assign-manager`.
    #[arg(long)]
    pub manager: Option<String>,

    /// Team member id for `update-team` (repeatable).
    #[arg(long = "member")]
    pub members: Vec<String>,

    /// Reason recorded with status changes.
    #[arg(long)]
    pub reason: Option<String>,

    /// Ask the server to notify stakeholders of status changes.
    #[arg(long)]
    pub notify: bool,
}

/// Translate flags into an operation for lifecycle `S`.
pub fn build_operation<S: Lifecycle>(args: &BulkArgs) -> Result<BulkOperation<S>> {
    Ok(match args.op {
        BulkOpArg::UpdateStatus => {
            let Some(raw) = args.status.as_deref() else {
                bail!("update-status requires --status");
            };
            BulkOperation::UpdateStatus {
                status: parse_target::<S>(raw)?,
                reason: args.reason.clone(),
                notify_stakeholders: args.notify,
            }
        }
        BulkOpArg::AssignManager => {
            let Some(manager_id) = args.manager.clone() else {
                bail!("assign-manager requires --manager");
            };
            BulkOperation::AssignManager { manager_id }
        }
        BulkOpArg::UpdateTeam => BulkOperation::UpdateTeam {
            member_ids: args.members.clone(),
        },
        BulkOpArg::Delete => BulkOperation::Delete,
    })
}

/// Fetch every id so status changes validate against the server's current
/// status. Ids that cannot be fetched fail without being sent.
async fn prefetch<S: Lifecycle>(
    sync: &Synchronizer,
    ids: Vec<EntityId>,
) -> (Vec<EntityId>, Vec<BulkFailure>) {
    let fetches = ids.into_iter().map(|id| async move {
        let entity = EntityRef::new(S::KIND, id.clone());
        let fetched = sync.fetch_entity(&entity).await;
        (id, fetched)
    });

    let mut ready = Vec::new();
    let mut failed = Vec::new();
    for (entity_id, fetched) in join_all(fetches).await {
        match fetched {
            Ok(_) => ready.push(entity_id),
            Err(error) => failed.push(BulkFailure { entity_id, error }),
        }
    }
    (ready, failed)
}

async fn run_for<S: Lifecycle>(
    sync: &Synchronizer,
    coordinator: &BulkCoordinator<S>,
    args: &BulkArgs,
) -> Result<BulkOperationResult> {
    let operation = build_operation::<S>(args)?;
    let ids: Vec<EntityId> = args.ids.iter().map(|id| EntityId::new(id.as_str())).collect();

    let (ready, prefailed) = if matches!(operation, BulkOperation::UpdateStatus { .. }) {
        prefetch::<S>(sync, ids).await
    } else {
        (ids, Vec::new())
    };

    let mut result = if ready.is_empty() {
        BulkOperationResult::default()
    } else {
        coordinator.apply(&operation, &ready).await
    };
    result.summary.total += prefailed.len();
    result.summary.failed += prefailed.len();
    result.failed.extend(prefailed);
    Ok(result)
}

pub async fn run_bulk(args: &BulkArgs, sync: &Synchronizer, output: OutputMode) -> Result<()> {
    let result = match EntityKind::from(args.kind) {
        EntityKind::Project => run_for(sync, sync.project_bulk(), args).await?,
        EntityKind::DailyReport => run_for(sync, sync.report_bulk(), args).await?,
    };
    render_mode(output, &result, write_text, write_pretty)?;

    if !result.is_complete_success() {
        bail!(
            "{} of {} operations failed",
            result.summary.failed,
            result.summary.total
        );
    }
    Ok(())
}

fn write_text(result: &BulkOperationResult, w: &mut dyn Write) -> io::Result<()> {
    for id in &result.successful {
        writeln!(w, "ok\t{id}")?;
    }
    for failure in &result.failed {
        writeln!(
            w,
            "failed\t{}\t{}\t{}",
            failure.entity_id,
            failure.error.code(),
            failure.error.user_message()
        )?;
    }
    Ok(())
}

fn write_pretty(result: &BulkOperationResult, w: &mut dyn Write) -> io::Result<()> {
    let summary = result.summary;
    pretty_section(w, "Bulk operation")?;
    pretty_kv(w, "Total", summary.total.to_string())?;
    pretty_kv(w, "Succeeded", summary.successful.to_string())?;
    pretty_kv(w, "Failed", summary.failed.to_string())?;
    if !result.failed.is_empty() {
        writeln!(w)?;
        for failure in &result.failed {
            writeln!(
                w,
                "✗ {:<16} [{}] {}",
                failure.entity_id.as_str(),
                failure.error.code(),
                failure.error.user_message()
            )?;
        }
    }
    Ok(())
}
