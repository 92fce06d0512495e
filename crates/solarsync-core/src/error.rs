use serde::Serialize;
use std::fmt;

use crate::client::{ApiErrorDetail, ApiResponse};
use crate::model::{ApprovalLevel, EntityRef};

/// Machine-readable error codes for UI and script decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCode {
    ConfigParseError,
    InvalidTransitionGraph,
    EntityNotFound,
    InvalidStateTransition,
    UnknownStatus,
    ApprovalRequired,
    ConflictingState,
    InvalidPayload,
    NetworkFailure,
    Unauthorized,
    Forbidden,
    RemoteNotFound,
    ServerError,
    ServerRejected,
    MalformedResponse,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1002",
            Self::InvalidTransitionGraph => "E1003",
            Self::EntityNotFound => "E2001",
            Self::InvalidStateTransition => "E2002",
            Self::UnknownStatus => "E2003",
            Self::ApprovalRequired => "E2004",
            Self::ConflictingState => "E2005",
            Self::InvalidPayload => "E2006",
            Self::NetworkFailure => "E4001",
            Self::Unauthorized => "E4002",
            Self::Forbidden => "E4003",
            Self::RemoteNotFound => "E4004",
            Self::ServerError => "E4005",
            Self::ServerRejected => "E4006",
            Self::MalformedResponse => "E4007",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidTransitionGraph => "Invalid status transition graph",
            Self::EntityNotFound => "Entity not loaded",
            Self::InvalidStateTransition => "Invalid status transition",
            Self::UnknownStatus => "Unrecognized status value",
            Self::ApprovalRequired => "Approval required",
            Self::ConflictingState => "Entity changed on the server",
            Self::InvalidPayload => "Invalid request payload",
            Self::NetworkFailure => "Network failure",
            Self::Unauthorized => "Not signed in",
            Self::Forbidden => "Permission denied",
            Self::RemoteNotFound => "Resource not found",
            Self::ServerError => "Server error",
            Self::ServerRejected => "Request rejected by server",
            Self::MalformedResponse => "Malformed server response",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to users and scripts.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in .solarsync/config.toml and retry."),
            Self::InvalidTransitionGraph => {
                Some("Terminal statuses must have no outgoing edges and every edge must be unique.")
            }
            Self::EntityNotFound => Some("Fetch the entity before changing it."),
            Self::InvalidStateTransition => {
                Some("Run `ssync workflow <kind> <id>` to list the allowed next statuses.")
            }
            Self::UnknownStatus => Some("The server reported a legacy status; no transitions are allowed from it."),
            Self::ApprovalRequired => Some("Ask an approver or resubmit with different parameters."),
            Self::ConflictingState => Some("Refetch the entity before retrying."),
            Self::NetworkFailure | Self::ServerError => Some("Retry the request."),
            Self::Unauthorized => Some("Sign in again or set SOLARSYNC_TOKEN."),
            Self::Forbidden => Some("Ask an administrator for access."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
            Self::InvalidPayload
            | Self::RemoteNotFound
            | Self::ServerRejected
            | Self::MalformedResponse => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The four error classes every failure falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Local pre-flight failure; never reached the network.
    Validation,
    /// Network or HTTP failure.
    Transport,
    /// Well-formed response with `success = false`.
    ServerRejection,
    /// The client's assumption about entity state is stale.
    Conflict,
}

/// A request that failed below the envelope level or with a transport status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransportError {
    /// HTTP status; `None` when no response arrived.
    pub status: Option<u16>,
    pub message: String,
}

impl TransportError {
    #[must_use]
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Statuses treated as transport failures rather than server rejections.
    #[must_use]
    pub const fn is_transport_status(status: u16) -> bool {
        matches!(status, 0 | 401 | 403 | 404 | 408 | 429) || status >= 500
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self.status {
            None | Some(0 | 408) => ErrorCode::NetworkFailure,
            Some(401) => ErrorCode::Unauthorized,
            Some(403) => ErrorCode::Forbidden,
            Some(404) => ErrorCode::RemoteNotFound,
            Some(_) => ErrorCode::ServerError,
        }
    }

    /// Whether retrying the identical request can succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.code(), ErrorCode::NetworkFailure | ErrorCode::ServerError)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) if status != 0 => write!(f, "HTTP {status}: {}", self.message),
            _ => write!(f, "network error: {}", self.message),
        }
    }
}

impl std::error::Error for TransportError {}

/// Top-level error taxonomy returned as a value by every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "class", rename_all = "snake_case")]
pub enum SyncError {
    #[error("{message}")]
    Validation { code: ErrorCode, message: String },

    #[error(transparent)]
    Transport(TransportError),

    #[error("server rejected request: {}", .message.as_deref().unwrap_or("no message"))]
    ServerRejection {
        code: ErrorCode,
        status: Option<u16>,
        message: Option<String>,
        errors: Vec<ApiErrorDetail>,
    },

    #[error("{message}")]
    Conflict {
        entity: Option<EntityRef>,
        message: String,
    },
}

impl SyncError {
    #[must_use]
    pub fn validation(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    /// Classify a failed envelope. `entity` is attached to conflicts.
    #[must_use]
    pub fn from_response(response: ApiResponse, entity: Option<&EntityRef>) -> Self {
        if response.status == 409 {
            return Self::Conflict {
                entity: entity.cloned(),
                message: response
                    .message
                    .unwrap_or_else(|| "entity state changed on the server".to_string()),
            };
        }
        if TransportError::is_transport_status(response.status) {
            return Self::Transport(TransportError::new(
                (response.status != 0).then_some(response.status),
                response
                    .message
                    .unwrap_or_else(|| "request failed".to_string()),
            ));
        }
        Self::ServerRejection {
            code: ErrorCode::ServerRejected,
            status: Some(response.status),
            message: response.message,
            errors: response.errors,
        }
    }

    /// A response that succeeded but whose payload could not be used.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::ServerRejection {
            code: ErrorCode::MalformedResponse,
            status: None,
            message: Some(message.into()),
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Validation { .. } => ErrorClass::Validation,
            Self::Transport(_) => ErrorClass::Transport,
            Self::ServerRejection { .. } => ErrorClass::ServerRejection,
            Self::Conflict { .. } => ErrorClass::Conflict,
        }
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { code, .. } | Self::ServerRejection { code, .. } => *code,
            Self::Transport(err) => err.code(),
            Self::Conflict { .. } => ErrorCode::ConflictingState,
        }
    }

    /// Text shown to the user: local validation text as-is, the server's
    /// message verbatim when present, otherwise a per-class fallback.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation { message, .. } => message.clone(),
            Self::Transport(err) => match err.code() {
                ErrorCode::Unauthorized => "Your session has expired. Please sign in again.".to_string(),
                ErrorCode::Forbidden => "You do not have permission to perform this action.".to_string(),
                ErrorCode::RemoteNotFound => "The requested record was not found.".to_string(),
                _ => "Network error. Check your connection and try again.".to_string(),
            },
            Self::ServerRejection { message, .. } => message
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "The server rejected the request.".to_string()),
            Self::Conflict { .. } => {
                "This record was changed by someone else. Refresh and try again.".to_string()
            }
        }
    }
}

/// Failure taxonomy of a single status transition request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkflowError {
    #[error("{entity} is not loaded")]
    EntityNotFound { entity: EntityRef },

    #[error("cannot transition {entity} from {from} to {to}")]
    InvalidTransition {
        entity: EntityRef,
        from: String,
        to: String,
        allowed: Vec<String>,
    },

    #[error("transition requires approval{}", .level.map(|l| format!(" ({l})")).unwrap_or_default())]
    ApprovalRequired {
        level: Option<ApprovalLevel>,
        message: Option<String>,
    },

    #[error(transparent)]
    NetworkFailure(TransportError),

    #[error("{entity} is {} on the server, expected {expected}", .actual.as_deref().unwrap_or("unknown"))]
    ConflictingState {
        entity: EntityRef,
        expected: String,
        actual: Option<String>,
    },

    #[error("server rejected transition: {}", .message.as_deref().unwrap_or("no message"))]
    Rejected {
        status: Option<u16>,
        message: Option<String>,
        errors: Vec<ApiErrorDetail>,
    },
}

impl WorkflowError {
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::EntityNotFound { .. } | Self::InvalidTransition { .. } => ErrorClass::Validation,
            Self::ApprovalRequired { .. } | Self::Rejected { .. } => ErrorClass::ServerRejection,
            Self::NetworkFailure(_) => ErrorClass::Transport,
            Self::ConflictingState { .. } => ErrorClass::Conflict,
        }
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::EntityNotFound { .. } => ErrorCode::EntityNotFound,
            Self::InvalidTransition { .. } => ErrorCode::InvalidStateTransition,
            Self::ApprovalRequired { .. } => ErrorCode::ApprovalRequired,
            Self::NetworkFailure(err) => err.code(),
            Self::ConflictingState { .. } => ErrorCode::ConflictingState,
            Self::Rejected { .. } => ErrorCode::ServerRejected,
        }
    }

    /// Only transport failures may be retried unchanged, and only by the caller.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkFailure(err) if err.is_retryable())
    }

    #[must_use]
    pub fn user_message(&self) -> String {
        SyncError::from(self.clone()).user_message()
    }
}

impl From<WorkflowError> for SyncError {
    fn from(err: WorkflowError) -> Self {
        let code = err.code();
        match err {
            WorkflowError::EntityNotFound { .. } | WorkflowError::InvalidTransition { .. } => {
                Self::Validation {
                    code,
                    message: err.to_string(),
                }
            }
            WorkflowError::ApprovalRequired { message, .. } => Self::ServerRejection {
                code,
                status: None,
                message,
                errors: Vec::new(),
            },
            WorkflowError::NetworkFailure(transport) => Self::Transport(transport),
            WorkflowError::ConflictingState { ref entity, .. } => Self::Conflict {
                entity: Some(entity.clone()),
                message: err.to_string(),
            },
            WorkflowError::Rejected {
                status,
                message,
                errors,
            } => Self::ServerRejection {
                code,
                status,
                message,
                errors,
            },
        }
    }
}
