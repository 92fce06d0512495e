//! Domain types shared by every component.

pub mod entity;
pub mod status;

pub use entity::{EntityId, EntityKind, EntityRef, EntitySnapshot, SnapshotError};
pub use status::{ApprovalLevel, Lifecycle, ParseEnumError, ProjectStatus, ReportStatus};
