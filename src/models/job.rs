//! Transfer negotiation types: node kind and the job resource a
//! transfer-intent submission creates. Jobs are only ever held in memory.

use std::fmt;

/// Type of node to create in the remote store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Data,
    Container,
}

impl NodeKind {
    pub fn xsi_type(&self) -> &'static str {
        match self {
            NodeKind::Data => "vos:DataNode",
            NodeKind::Container => "vos:ContainerNode",
        }
    }
}

/// Outcome of `ensure_node_exists`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct NodeStatus {
    pub existed: bool,
    pub created: bool,
}

/// Execution phase of a job resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobPhase {
    Pending,
    Queued,
    Executing,
    Held,
    Suspended,
    Completed,
    Error,
    Aborted,
    Unknown(String),
}

impl JobPhase {
    /// Parse a phase name; matching is case-insensitive.
    pub fn from_wire(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "PENDING" => JobPhase::Pending,
            "QUEUED" => JobPhase::Queued,
            "EXECUTING" => JobPhase::Executing,
            "HELD" => JobPhase::Held,
            "SUSPENDED" => JobPhase::Suspended,
            "COMPLETED" => JobPhase::Completed,
            "ERROR" => JobPhase::Error,
            "ABORTED" => JobPhase::Aborted,
            _ => JobPhase::Unknown(value.trim().to_string()),
        }
    }

    /// Terminal phases never change again. Unknown phases are treated as
    /// terminal so the client does not poll something it cannot interpret.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            JobPhase::Pending
                | JobPhase::Queued
                | JobPhase::Executing
                | JobPhase::Held
                | JobPhase::Suspended
        )
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPhase::Pending => f.write_str("PENDING"),
            JobPhase::Queued => f.write_str("QUEUED"),
            JobPhase::Executing => f.write_str("EXECUTING"),
            JobPhase::Held => f.write_str("HELD"),
            JobPhase::Suspended => f.write_str("SUSPENDED"),
            JobPhase::Completed => f.write_str("COMPLETED"),
            JobPhase::Error => f.write_str("ERROR"),
            JobPhase::Aborted => f.write_str("ABORTED"),
            JobPhase::Unknown(raw) => write!(f, "UNKNOWN({})", raw),
        }
    }
}

/// A snapshot of a transfer job as read from its job resource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferJob {
    pub phase: JobPhase,

    /// Href of the `transferDetails` result, once the job has produced one.
    pub transfer_details_url: Option<String>,

    /// Message from the job's error summary.
    pub error_message: Option<String>,
}
