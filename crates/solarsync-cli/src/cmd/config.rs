//! `ssync config` — print the effective configuration.

use anyhow::Result;
use clap::Args;
use solarsync_core::config::EffectiveConfig;
use std::io::{self, Write};

use crate::output::{OutputMode, render_mode};

#[derive(Args, Debug)]
pub struct ConfigArgs {}

pub fn run_config(_args: &ConfigArgs, effective: &EffectiveConfig, output: OutputMode) -> Result<()> {
    render_mode(output, effective, write_text, write_pretty)
}

fn write_text(value: &EffectiveConfig, w: &mut dyn Write) -> io::Result<()> {
    for (key, val) in flatten(value) {
        writeln!(w, "{key}={val}")?;
    }
    Ok(())
}

fn write_pretty(value: &EffectiveConfig, w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "resolved_output = \"{}\"", value.resolved_output)?;
    writeln!(w)?;
    let sync = toml::to_string_pretty(&value.sync).map_err(io::Error::other)?;
    write!(w, "{sync}")?;
    if value.user.user.is_some() || value.user.output.is_some() || value.user.api_url.is_some() {
        writeln!(w)?;
        writeln!(w, "[user]")?;
        let user = toml::to_string_pretty(&value.user).map_err(io::Error::other)?;
        write!(w, "{user}")?;
    }
    Ok(())
}

/// `section.key=value` pairs in a stable order.
fn flatten(value: &EffectiveConfig) -> Vec<(String, String)> {
    let sync = &value.sync;
    let mut pairs = vec![
        ("resolved_output".to_string(), value.resolved_output.clone()),
        ("api.base_url".to_string(), sync.api.base_url.clone()),
        ("api.timeout_secs".to_string(), sync.api.timeout_secs.to_string()),
        (
            "api.use_bulk_endpoint".to_string(),
            sync.api.use_bulk_endpoint.to_string(),
        ),
        (
            "poll.projects_interval_secs".to_string(),
            sync.poll.projects_interval_secs.to_string(),
        ),
        (
            "poll.daily_reports_interval_secs".to_string(),
            sync.poll.daily_reports_interval_secs.to_string(),
        ),
        ("notifications.cap".to_string(), sync.notifications.cap.to_string()),
        (
            "bulk.max_concurrency".to_string(),
            sync.bulk.max_concurrency.to_string(),
        ),
    ];
    if let Some(user) = &value.user.user {
        pairs.push(("user.user".to_string(), user.clone()));
    }
    if let Some(output) = &value.user.output {
        pairs.push(("user.output".to_string(), output.clone()));
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use solarsync_core::config::{SyncConfig, UserConfig};

    fn effective() -> EffectiveConfig {
        EffectiveConfig {
            sync: SyncConfig::default(),
            user: UserConfig {
                user: Some("u-ops".into()),
                ..UserConfig::default()
            },
            resolved_output: "text".into(),
        }
    }

    #[test]
    fn text_lists_every_section() {
        let mut buf = Vec::new();
        write_text(&effective(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("api.base_url=http://localhost:3000/api\n"));
        assert!(text.contains("poll.daily_reports_interval_secs=5\n"));
        assert!(text.contains("notifications.cap=50\n"));
        assert!(text.contains("user.user=u-ops\n"));
        assert!(!text.contains("user.output"));
    }

    #[test]
    fn pretty_is_valid_toml_after_header() {
        let mut buf = Vec::new();
        write_pretty(&effective(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let parsed: toml::Value = toml::from_str(&text).unwrap();
        assert_eq!(parsed["resolved_output"].as_str(), Some("text"));
        assert_eq!(parsed["bulk"]["max_concurrency"].as_integer(), Some(8));
        assert_eq!(parsed["user"]["user"].as_str(), Some("u-ops"));
    }
}
