//! solarsync-core library.
//!
//! Client-side synchronisation for a solar-installation project dashboard:
//! an entity store with optimistic patches, a polling change feed folded into
//! a bounded notification log, status workflows with approval hints, and bulk
//! operations that report partial failure.
//!
//! # Conventions
//!
//! - **Errors**: library operations return typed errors ([`error::SyncError`],
//!   [`error::WorkflowError`]) as values; `anyhow` is only used for config
//!   loading.
//! - **Logging**: `tracing` macros with structured fields; the binary decides
//!   where they go.
//! - **Runtime**: async code runs on tokio. Every shared type is
//!   `Send + Sync`, so either runtime flavour works.

pub mod bulk;
pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod runtime;
pub mod store;
pub mod sync;
pub mod workflow;

pub use runtime::{SyncContext, Synchronizer};
