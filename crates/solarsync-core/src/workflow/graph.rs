//! Declarative status transition graphs.
//!
//! A graph is built once, validated, and never mutated. Statuses without
//! outgoing edges are terminal.

use std::collections::HashMap;

use serde::Serialize;

use crate::model::{ApprovalLevel, Lifecycle, ProjectStatus, ReportStatus};

// ---------------------------------------------------------------------------
// Edges and errors
// ---------------------------------------------------------------------------

/// One allowed move out of a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransitionEdge<S> {
    pub to: S,
    pub requires_approval: bool,
    pub approval_level: Option<ApprovalLevel>,
}

/// A graph definition that must not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("status '{status}' has a transition to itself")]
    SelfLoop { status: String },
    #[error("transition {from} -> {to} is declared twice")]
    DuplicateEdge { from: String, to: String },
    #[error("terminal status '{status}' has outgoing transitions")]
    TerminalHasEdges { status: String },
    #[error("status '{status}' has no transitions and is not declared terminal")]
    UnlistedStatus { status: String },
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TransitionGraph<S: Lifecycle> {
    edges: HashMap<S, Vec<TransitionEdge<S>>>,
}

impl<S: Lifecycle> TransitionGraph<S> {
    #[must_use]
    pub fn builder() -> GraphBuilder<S> {
        GraphBuilder {
            edges: Vec::new(),
            terminal: Vec::new(),
        }
    }

    /// Outgoing edges in declaration order. Empty for terminal statuses.
    #[must_use]
    pub fn allowed(&self, from: S) -> &[TransitionEdge<S>] {
        self.edges.get(&from).map_or(&[][..], Vec::as_slice)
    }

    /// Target statuses reachable from `from` in one step.
    #[must_use]
    pub fn targets(&self, from: S) -> Vec<S> {
        self.allowed(from).iter().map(|edge| edge.to).collect()
    }

    #[must_use]
    pub fn edge(&self, from: S, to: S) -> Option<&TransitionEdge<S>> {
        self.allowed(from).iter().find(|edge| edge.to == to)
    }

    #[must_use]
    pub fn is_terminal(&self, status: S) -> bool {
        self.allowed(status).is_empty()
    }

    /// `(requires_approval, highest level)` over every edge out of `from`.
    #[must_use]
    pub fn approval_summary(&self, from: S) -> (bool, Option<ApprovalLevel>) {
        let edges = self.allowed(from);
        let requires = edges.iter().any(|edge| edge.requires_approval);
        let level = edges.iter().filter_map(|edge| edge.approval_level).max();
        (requires, level)
    }
}

impl TransitionGraph<ProjectStatus> {
    /// The project lifecycle.
    ///
    /// # Errors
    ///
    /// Never in practice; the definition is validated like any other.
    pub fn standard() -> Result<Self, GraphError> {
        use ApprovalLevel::{Admin, Manager};
        use ProjectStatus::{Cancelled, Completed, InProgress, OnHold, Planning};

        Self::builder()
            .edge(Planning, InProgress)
            .edge(Planning, OnHold)
            .approval(Planning, Cancelled, Manager)
            .edge(InProgress, OnHold)
            .approval(InProgress, Completed, Manager)
            .approval(InProgress, Cancelled, Admin)
            .edge(OnHold, InProgress)
            .edge(OnHold, Planning)
            .approval(OnHold, Cancelled, Admin)
            .terminal(Completed)
            .terminal(Cancelled)
            .build()
    }
}

impl TransitionGraph<ReportStatus> {
    /// The daily report review cycle.
    ///
    /// # Errors
    ///
    /// Never in practice; the definition is validated like any other.
    pub fn standard() -> Result<Self, GraphError> {
        use ApprovalLevel::Supervisor;
        use ReportStatus::{Approved, Draft, Rejected, Submitted};

        Self::builder()
            .edge(Draft, Submitted)
            .approval(Submitted, Approved, Supervisor)
            .approval(Submitted, Rejected, Supervisor)
            .edge(Submitted, Draft)
            .edge(Rejected, Draft)
            .terminal(Approved)
            .build()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GraphBuilder<S: Lifecycle> {
    edges: Vec<(S, TransitionEdge<S>)>,
    terminal: Vec<S>,
}

impl<S: Lifecycle> GraphBuilder<S> {
    #[must_use]
    pub fn edge(mut self, from: S, to: S) -> Self {
        self.edges.push((
            from,
            TransitionEdge {
                to,
                requires_approval: false,
                approval_level: None,
            },
        ));
        self
    }

    #[must_use]
    pub fn approval(mut self, from: S, to: S, level: ApprovalLevel) -> Self {
        self.edges.push((
            from,
            TransitionEdge {
                to,
                requires_approval: true,
                approval_level: Some(level),
            },
        ));
        self
    }

    #[must_use]
    pub fn terminal(mut self, status: S) -> Self {
        self.terminal.push(status);
        self
    }

    /// Validate and freeze the graph.
    ///
    /// # Errors
    ///
    /// Any [`GraphError`]: self-loops, duplicate edges, terminal statuses
    /// with edges, or statuses that are neither terminal nor have edges.
    pub fn build(self) -> Result<TransitionGraph<S>, GraphError> {
        let mut edges: HashMap<S, Vec<TransitionEdge<S>>> = HashMap::new();
        for (from, edge) in self.edges {
            if from == edge.to {
                return Err(GraphError::SelfLoop {
                    status: from.as_str().to_string(),
                });
            }
            let out = edges.entry(from).or_default();
            if out.iter().any(|existing| existing.to == edge.to) {
                return Err(GraphError::DuplicateEdge {
                    from: from.as_str().to_string(),
                    to: edge.to.as_str().to_string(),
                });
            }
            out.push(edge);
        }

        if let Some(status) = self.terminal.iter().find(|s| edges.contains_key(*s)) {
            return Err(GraphError::TerminalHasEdges {
                status: status.as_str().to_string(),
            });
        }
        if let Some(status) = S::ALL
            .iter()
            .find(|s| !edges.contains_key(*s) && !self.terminal.contains(*s))
        {
            return Err(GraphError::UnlistedStatus {
                status: status.as_str().to_string(),
            });
        }

        Ok(TransitionGraph { edges })
    }
}
