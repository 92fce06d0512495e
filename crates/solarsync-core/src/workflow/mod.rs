//! Status workflows: transition graphs, history, and the engine that
//! validates and commits status changes.

pub mod engine;
pub mod graph;
pub mod history;

pub use engine::{TransitionOutcome, TransitionPlan, TransitionRequest, WorkflowEngine};
pub use graph::{GraphBuilder, GraphError, TransitionEdge, TransitionGraph};
pub use history::{StatusHistoryEntry, WorkflowSnapshot};
