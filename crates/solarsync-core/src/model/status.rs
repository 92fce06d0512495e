use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use super::entity::EntityKind;

/// A status enumeration owned by one entity kind.
///
/// The workflow engine is generic over this trait: one engine instance per
/// entity kind, each validating movement through its own status set.
pub trait Lifecycle:
    Copy + Eq + Hash + fmt::Debug + fmt::Display + FromStr<Err = ParseEnumError> + Send + Sync + 'static
{
    /// Entity kind whose `status` field holds values of this type.
    const KIND: EntityKind;

    /// Every status in declaration order.
    const ALL: &'static [Self];

    /// Canonical wire form (snake_case).
    fn as_str(self) -> &'static str;
}

/// Lifecycle of a solar installation project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Planning,
    InProgress,
    OnHold,
    Completed,
    Cancelled,
}

impl Lifecycle for ProjectStatus {
    const KIND: EntityKind = EntityKind::Project;

    const ALL: &'static [Self] = &[
        Self::Planning,
        Self::InProgress,
        Self::OnHold,
        Self::Completed,
        Self::Cancelled,
    ];

    fn as_str(self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::InProgress => "in_progress",
            Self::OnHold => "on_hold",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Lifecycle of a site daily report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
}

impl Lifecycle for ReportStatus {
    const KIND: EntityKind = EntityKind::DailyReport;

    const ALL: &'static [Self] = &[Self::Draft, Self::Submitted, Self::Approved, Self::Rejected];

    fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Submitted => "submitted",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

/// Who must sign off on a transition. Ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalLevel {
    Supervisor,
    Manager,
    Admin,
}

impl ApprovalLevel {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Supervisor => "supervisor",
            Self::Manager => "manager",
            Self::Admin => "admin",
        }
    }
}

/// Error returned when parsing a kind, status or level from text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: '{}'", self.expected, self.got)
    }
}

impl std::error::Error for ParseEnumError {}

/// Fold case and drop separators so `InProgress`, `in_progress` and
/// `IN-PROGRESS` compare equal.
pub(super) fn normalize(input: &str) -> String {
    input
        .trim()
        .chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn parse_lifecycle<S: Lifecycle>(input: &str, expected: &'static str) -> Result<S, ParseEnumError> {
    let wanted = normalize(input);
    S::ALL
        .iter()
        .copied()
        .find(|status| normalize(status.as_str()) == wanted)
        .ok_or_else(|| ParseEnumError {
            expected,
            got: input.to_string(),
        })
}

impl FromStr for ProjectStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_lifecycle(s, "project status")
    }
}

impl FromStr for ReportStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_lifecycle(s, "daily report status")
    }
}

impl FromStr for ApprovalLevel {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "supervisor" => Ok(Self::Supervisor),
            "manager" => Ok(Self::Manager),
            "admin" => Ok(Self::Admin),
            _ => Err(ParseEnumError {
                expected: "approval level",
                got: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ApprovalLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
