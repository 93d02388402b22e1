//! Error taxonomy shared by every service.
//!
//! Each variant has a stable code so UI and CLI layers can branch on the
//! failure without parsing messages.

use crate::models::{job::JobPhase, record::RecordStatus};
use crate::services::workflow::ReviewAction;
use thiserror::Error;

pub type RaftResult<T> = Result<T, RaftError>;

#[derive(Debug, Error)]
pub enum RaftError {
    #[error("no session token available")]
    NotAuthenticated,

    #[error("action `{action}` is not permitted from status `{from}`")]
    IllegalTransition {
        from: RecordStatus,
        action: ReviewAction,
    },

    #[error("`{caller}` is not the assigned reviewer (assigned: {assigned:?})")]
    NotAssignedReviewer {
        caller: String,
        assigned: Option<String>,
    },

    #[error("node `{path}` unavailable ({status}): {body}")]
    NodeUnavailable {
        path: String,
        status: u16,
        body: String,
    },

    #[error("transfer negotiation failed: {reason}")]
    TransferNegotiationFailed { reason: String },

    #[error("transfer job `{job_url}` not ready (phase {phase})")]
    NotYetReady { job_url: String, phase: JobPhase },

    #[error("no transfer endpoint resolved for `{path}`")]
    NoEndpointResolved { path: String },

    #[error("upload failed with status {status}: {body}")]
    UploadFailed { status: u16, body: String },

    #[error("download of `{path}` failed with status {status}: {body}")]
    DownloadFailed {
        path: String,
        status: u16,
        body: String,
    },

    #[error("delete of `{path}` failed with status {status}: {body}")]
    RemoteDeleteFailed {
        path: String,
        status: u16,
        body: String,
    },

    #[error("record has no data directory; cannot address `{filename}`")]
    MissingContext { filename: String },

    #[error("persist failed with status {status}: {body}")]
    PersistFailed { status: u16, body: String },

    #[error("record has not been persisted yet")]
    NotPersisted,

    #[error("`{operation}` is not permitted while the record is `{status}`")]
    OperationNotPermitted {
        operation: &'static str,
        status: RecordStatus,
    },

    #[error("section validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error("invalid attachment: {0}")]
    InvalidAttachment(String),

    #[error("malformed protocol document: {0}")]
    MalformedDocument(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RaftError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            RaftError::NotAuthenticated => "NOT_AUTHENTICATED",
            RaftError::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            RaftError::NotAssignedReviewer { .. } => "NOT_ASSIGNED_REVIEWER",
            RaftError::NodeUnavailable { .. } => "NODE_UNAVAILABLE",
            RaftError::TransferNegotiationFailed { .. } => "TRANSFER_NEGOTIATION_FAILED",
            RaftError::NotYetReady { .. } => "NOT_YET_READY",
            RaftError::NoEndpointResolved { .. } => "NO_ENDPOINT_RESOLVED",
            RaftError::UploadFailed { .. } => "UPLOAD_FAILED",
            RaftError::DownloadFailed { .. } => "DOWNLOAD_FAILED",
            RaftError::RemoteDeleteFailed { .. } => "REMOTE_DELETE_FAILED",
            RaftError::MissingContext { .. } => "MISSING_CONTEXT",
            RaftError::PersistFailed { .. } => "PERSIST_FAILED",
            RaftError::NotPersisted => "NOT_PERSISTED",
            RaftError::OperationNotPermitted { .. } => "OPERATION_NOT_PERMITTED",
            RaftError::ValidationFailed(_) => "VALIDATION_FAILED",
            RaftError::InvalidAttachment(_) => "INVALID_ATTACHMENT",
            RaftError::MalformedDocument(_) => "MALFORMED_DOCUMENT",
            RaftError::Config(_) => "CONFIG_ERROR",
            RaftError::Http(_) => "HTTP_ERROR",
            RaftError::Json(_) => "JSON_ERROR",
            RaftError::Io(_) => "IO_ERROR",
        }
    }

    /// Soft failures are logged and absorbed by the caller rather than
    /// aborting the surrounding operation.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            RaftError::NodeUnavailable { .. } | RaftError::RemoteDeleteFailed { .. }
        )
    }
}
