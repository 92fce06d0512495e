//! `ssync workflow` — fetch an entity and show where it sits in its lifecycle.

use anyhow::Result;
use chrono::Local;
use clap::Args;
use serde::Serialize;
use solarsync_core::Synchronizer;
use solarsync_core::model::{EntityKind, EntityRef};
use solarsync_core::workflow::WorkflowSnapshot;
use std::io::{self, Write};

use super::KindArg;
use crate::output::{OutputMode, pretty_kv, pretty_rule, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct WorkflowArgs {
    #[arg(value_enum)]
    pub kind: KindArg,

    /// Entity id.
    pub id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowView {
    pub entity: EntityRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub workflow: WorkflowSnapshot,
}

pub async fn run_workflow(args: &WorkflowArgs, sync: &Synchronizer, output: OutputMode) -> Result<()> {
    let entity = EntityRef::new(args.kind.into(), args.id.as_str());
    let snapshot = sync.fetch_entity(&entity).await?;
    let workflow = match entity.kind {
        EntityKind::Project => sync.projects().workflow(&entity.id)?,
        EntityKind::DailyReport => sync.daily_reports().workflow(&entity.id)?,
    };
    let view = WorkflowView {
        name: snapshot.name().map(str::to_string),
        entity,
        workflow,
    };
    render_mode(output, &view, write_text, write_pretty)
}

fn write_text(view: &WorkflowView, w: &mut dyn Write) -> io::Result<()> {
    let wf = &view.workflow;
    writeln!(
        w,
        "{}\t{}\t{}\t{}",
        view.entity,
        wf.current_status,
        wf.allowed_transitions.join(","),
        wf.approval_level.map_or_else(|| "-".to_string(), |level| level.to_string())
    )
}

fn write_pretty(view: &WorkflowView, w: &mut dyn Write) -> io::Result<()> {
    let wf = &view.workflow;
    let heading = view
        .name
        .as_deref()
        .map_or_else(|| view.entity.to_string(), |name| format!("{name} ({})", view.entity));
    pretty_section(w, &heading)?;

    let status = if wf.recognized {
        wf.current_status.clone()
    } else {
        format!("{} (unrecognized)", wf.current_status)
    };
    pretty_kv(w, "Status", status)?;

    let next = if wf.allowed_transitions.is_empty() {
        "none".to_string()
    } else {
        wf.allowed_transitions.join(", ")
    };
    pretty_kv(w, "Next", next)?;

    if wf.requires_approval {
        let level = wf
            .approval_level
            .map_or_else(|| "approver".to_string(), |level| level.to_string());
        pretty_kv(w, "Approval", format!("some transitions need {level} sign-off"))?;
    }

    if !wf.status_history.is_empty() {
        writeln!(w)?;
        writeln!(w, "History")?;
        pretty_rule(w)?;
        for entry in &wf.status_history {
            let at = entry.changed_at.with_timezone(&Local).format("%Y-%m-%d %H:%M");
            let by = entry.changed_by.as_deref().unwrap_or("unknown");
            write!(w, "{at}  {:<12} by {by}", entry.status)?;
            if let Some(reason) = &entry.reason {
                write!(w, "  ({reason})")?;
            }
            writeln!(w)?;
        }
    }
    Ok(())
}
