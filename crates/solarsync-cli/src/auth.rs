//! Identity and token resolution for the auth provider.
//!
//! The user chain: `--user` flag > `SOLARSYNC_USER` env > user config `user`
//! > `USER` env (TTY only). The bearer token comes from `SOLARSYNC_TOKEN`.
//! Read-only commands work without an identity; transitions record it in the
//! status history when present.

use solarsync_core::client::{StaticAuth, UserIdentity};
use std::env;

/// Environment reader trait for dependency injection in tests.
trait EnvReader {
    fn get(&self, key: &str) -> Option<String>;
    fn is_tty(&self) -> bool;
}

struct RealEnv;

impl EnvReader for RealEnv {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok().filter(|v| !v.trim().is_empty())
    }

    fn is_tty(&self) -> bool {
        use std::io::IsTerminal;
        std::io::stdin().is_terminal()
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Parse `id` or `id=Display Name`.
fn parse_identity(raw: &str) -> UserIdentity {
    match raw.split_once('=') {
        Some((id, name)) if !name.trim().is_empty() => UserIdentity::new(id.trim(), name.trim()),
        Some((id, _)) => UserIdentity::new(id.trim(), id.trim()),
        None => UserIdentity::new(raw, raw),
    }
}

fn resolve_user_with(
    cli_flag: Option<&str>,
    config_user: Option<&str>,
    env: &dyn EnvReader,
) -> Option<UserIdentity> {
    non_empty(cli_flag)
        .or_else(|| env.get("SOLARSYNC_USER"))
        .or_else(|| non_empty(config_user))
        .or_else(|| env.is_tty().then(|| env.get("USER")).flatten())
        .map(|raw| parse_identity(&raw))
}

fn resolve_auth_with(
    cli_flag: Option<&str>,
    config_user: Option<&str>,
    env: &dyn EnvReader,
) -> StaticAuth {
    StaticAuth::new(
        resolve_user_with(cli_flag, config_user, env),
        env.get("SOLARSYNC_TOKEN"),
    )
}

/// Build the auth provider handed to the synchronizer.
pub fn resolve_auth(cli_flag: Option<&str>, config_user: Option<&str>) -> StaticAuth {
    resolve_auth_with(cli_flag, config_user, &RealEnv)
}
