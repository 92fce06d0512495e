//! `ssync watch` — poll a change feed and print notifications as they arrive.

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use clap::Args;
use solarsync_core::Synchronizer;
use solarsync_core::error::SyncError;
use solarsync_core::model::EntityKind;
use solarsync_core::sync::{Notification, PollScope};
use std::io::{self, Write};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::KindArg;
use crate::output::OutputMode;

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Entity kind to watch.
    #[arg(long, value_enum, default_value = "projects")]
    pub kind: KindArg,

    /// Watch one entity instead of the whole collection.
    #[arg(long)]
    pub id: Option<String>,

    /// Start from this RFC 3339 timestamp instead of now.
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,

    /// Stop after this many poll cycles. Runs until interrupted by default.
    #[arg(long)]
    pub cycles: Option<u32>,
}

impl WatchArgs {
    fn scope(&self) -> PollScope {
        let kind = EntityKind::from(self.kind);
        match &self.id {
            Some(id) => PollScope::entity(kind, id.as_str()),
            None => PollScope::Kind(kind),
        }
    }
}

/// Auth and routing failures repeat on every poll; stop instead of spinning.
const fn is_fatal(err: &SyncError) -> bool {
    matches!(err, SyncError::Transport(transport) if !transport.is_retryable())
}

pub async fn run_watch(
    args: &WatchArgs,
    sync: &Synchronizer,
    output: OutputMode,
    quiet: bool,
) -> Result<()> {
    let scope = args.scope();
    let period = sync.config().poll.interval_for(scope.kind());
    let handle = sync.register(scope.clone(), args.since);
    if !quiet {
        eprintln!("watching {scope} every {}s (Ctrl-C to stop)", period.as_secs());
    }

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_seen = 0_u64;
    let mut cycle = 0_u32;

    let outcome: Result<()> = loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => break Ok(()),
        }

        match sync.sync_once(handle).await {
            Ok(report) => debug!(
                %scope,
                appended = report.appended.len(),
                duplicates = report.duplicates,
                "poll cycle"
            ),
            Err(err) if is_fatal(&err) => break Err(err.into()),
            Err(err) => warn!(%scope, error = %err, "poll failed; retrying next cycle"),
        }

        let fresh = sync.with_notifications(|log| log.since(last_seen));
        if let Some(last) = fresh.last() {
            last_seen = last.id;
        }
        let stdout = io::stdout();
        let mut out = stdout.lock();
        if let Err(err) = write_notifications(&mut out, output, &fresh) {
            break Err(err.into());
        }

        cycle += 1;
        if args.cycles.is_some_and(|max| cycle >= max) {
            break Ok(());
        }
    };

    sync.unsubscribe(handle);
    outcome
}

/// JSON mode streams one object per line.
fn write_notifications(w: &mut dyn Write, output: OutputMode, notes: &[Notification]) -> io::Result<()> {
    for note in notes {
        match output {
            OutputMode::Json => {
                let line = serde_json::to_string(note).map_err(io::Error::other)?;
                writeln!(w, "{line}")?;
            }
            OutputMode::Text => writeln!(
                w,
                "{}\t{}\t{}\t{}",
                note.id,
                note.timestamp.to_rfc3339(),
                note.entity,
                note.message
            )?,
            OutputMode::Pretty => {
                let at = note.timestamp.with_timezone(&Local).format("%H:%M:%S");
                writeln!(w, "[{at}] {}", note.message)?;
            }
        }
    }
    w.flush()
}
