//! Server-owned entities as the client sees them.
//!
//! The API always returns complete objects, so an [`EntitySnapshot`] is the
//! whole JSON object for one entity. Only `id`, `status` and a display name
//! are interpreted; every other field is carried opaquely so that partial
//! change-feed payloads can be folded onto the last known snapshot.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::status::{ParseEnumError, normalize};

/// The entity types kept in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    #[serde(alias = "projects")]
    Project,
    #[serde(alias = "dailyReport", alias = "daily-report", alias = "daily_reports")]
    DailyReport,
}

impl EntityKind {
    pub const ALL: [Self; 2] = [Self::Project, Self::DailyReport];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Project => "project",
            Self::DailyReport => "daily_report",
        }
    }

    /// REST collection segment, e.g. `projects` in `/projects/{id}/status`.
    #[must_use]
    pub const fn resource(self) -> &'static str {
        match self {
            Self::Project => "projects",
            Self::DailyReport => "daily-reports",
        }
    }

    /// Human label used in notification text.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Project => "Project",
            Self::DailyReport => "Daily report",
        }
    }

    /// Fields a payload must carry to stand in for a full snapshot.
    #[must_use]
    pub const fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::Project => &["id", "name", "status"],
            Self::DailyReport => &["id", "projectId", "reportDate", "status"],
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "project" | "projects" => Ok(Self::Project),
            "dailyreport" | "dailyreports" | "report" | "reports" => Ok(Self::DailyReport),
            _ => Err(ParseEnumError {
                expected: "entity kind",
                got: s.to_string(),
            }),
        }
    }
}

/// Immutable server-assigned identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read an id out of a JSON value; servers send ids as strings or numbers.
    #[must_use]
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for EntityId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Store key: ids are only unique within one entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    #[must_use]
    pub fn new(kind: EntityKind, id: impl Into<EntityId>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn project(id: impl Into<EntityId>) -> Self {
        Self::new(EntityKind::Project, id)
    }

    #[must_use]
    pub fn daily_report(id: impl Into<EntityId>) -> Self {
        Self::new(EntityKind::DailyReport, id)
    }

    /// `/<resource>/<id>`
    #[must_use]
    pub fn path(&self) -> String {
        format!("/{}/{}", self.kind.resource(), self.id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Reasons a JSON payload cannot become a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("{kind} payload is not a JSON object")]
    NotAnObject { kind: EntityKind },
    #[error("{kind} payload has no usable id")]
    MissingId { kind: EntityKind },
    #[error("{kind} payload is missing required field '{field}'")]
    MissingField {
        kind: EntityKind,
        field: &'static str,
    },
}

/// Last known full server object for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitySnapshot {
    kind: EntityKind,
    id: EntityId,
    fields: Map<String, Value>,
}

impl EntitySnapshot {
    /// Build a snapshot from a complete server object.
    ///
    /// # Errors
    ///
    /// Fails when the value is not an object, has no id, or lacks any of the
    /// kind's [`EntityKind::required_fields`].
    pub fn from_value(kind: EntityKind, value: Value) -> Result<Self, SnapshotError> {
        let Value::Object(fields) = value else {
            return Err(SnapshotError::NotAnObject { kind });
        };
        Self::from_fields(kind, fields)
    }

    /// Same as [`from_value`](Self::from_value) for an already unpacked object.
    ///
    /// # Errors
    ///
    /// See [`from_value`](Self::from_value).
    pub fn from_fields(kind: EntityKind, fields: Map<String, Value>) -> Result<Self, SnapshotError> {
        let id = fields
            .get("id")
            .and_then(EntityId::from_json)
            .ok_or(SnapshotError::MissingId { kind })?;
        if let Some(field) = kind
            .required_fields()
            .iter()
            .find(|field| fields.get(**field).is_none_or(Value::is_null))
        {
            return Err(SnapshotError::MissingField { kind, field });
        }
        Ok(Self { kind, id, fields })
    }

    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        self.kind
    }

    #[must_use]
    pub const fn id(&self) -> &EntityId {
        &self.id
    }

    #[must_use]
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind, self.id.clone())
    }

    /// Raw server status. May be a legacy value no lifecycle recognizes.
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.fields.get("status").and_then(Value::as_str)
    }

    /// Display name: `name`, then `title`, then the report date.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        ["name", "title", "reportDate"]
            .iter()
            .find_map(|key| self.fields.get(*key).and_then(Value::as_str))
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    #[must_use]
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Copy with `status` replaced.
    #[must_use]
    pub fn with_status(&self, status: &str) -> Self {
        let mut next = self.clone();
        next.fields
            .insert("status".to_string(), Value::String(status.to_string()));
        next
    }

    /// Overlay a partial payload onto this snapshot, top-level field by field.
    ///
    /// The `id` is never taken from the patch.
    #[must_use]
    pub fn merged(&self, patch: &Map<String, Value>) -> Self {
        let mut next = self.clone();
        for (key, value) in patch {
            if key == "id" {
                continue;
            }
            next.fields.insert(key.clone(), value.clone());
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn project(id: &str, status: &str) -> EntitySnapshot {
        EntitySnapshot::from_value(
            EntityKind::Project,
            json!({"id": id, "name": "Rooftop array", "status": status, "capacityKw": 12.5}),
        )
        .unwrap()
    }

    #[test]
    fn snapshot_requires_kind_fields() {
        let err = EntitySnapshot::from_value(EntityKind::Project, json!({"id": "p1", "status": "planning"}))
            .unwrap_err();
        assert_eq!(
            err,
            SnapshotError::MissingField {
                kind: EntityKind::Project,
                field: "name"
            }
        );
    }

    #[test]
    fn numeric_ids_are_accepted() {
        let snap = EntitySnapshot::from_value(
            EntityKind::DailyReport,
            json!({"id": 42, "projectId": "p1", "reportDate": "2026-03-01", "status": "draft"}),
        )
        .unwrap();
        assert_eq!(snap.id().as_str(), "42");
        assert_eq!(snap.name(), Some("2026-03-01"));
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(matches!(
            EntitySnapshot::from_value(EntityKind::Project, json!([1, 2])),
            Err(SnapshotError::NotAnObject { .. })
        ));
    }

    #[test]
    fn merge_overlays_patch_but_keeps_id() {
        let snap = project("p1", "planning");
        let patch = json!({"id": "other", "status": "in_progress", "capacityKw": 20});
        let merged = snap.merged(patch.as_object().unwrap());
        assert_eq!(merged.id().as_str(), "p1");
        assert_eq!(merged.status(), Some("in_progress"));
        assert_eq!(merged.get("capacityKw"), Some(&json!(20)));
        assert_eq!(merged.name(), Some("Rooftop array"));
    }

    #[test]
    fn entity_ref_path_uses_resource_segment() {
        assert_eq!(EntityRef::project("p1").path(), "/projects/p1");
        assert_eq!(EntityRef::daily_report("r9").path(), "/daily-reports/r9");
    }

    #[test]
    fn entity_kind_parses_cli_spellings() {
        assert_eq!("projects".parse::<EntityKind>().unwrap(), EntityKind::Project);
        assert_eq!("daily-reports".parse::<EntityKind>().unwrap(), EntityKind::DailyReport);
        assert_eq!("DailyReport".parse::<EntityKind>().unwrap(), EntityKind::DailyReport);
        let err = "invoice".parse::<EntityKind>().unwrap_err();
        assert_eq!(err.to_string(), "invalid entity kind: 'invoice'");
    }
}
