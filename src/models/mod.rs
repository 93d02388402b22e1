//! Core data models for RAFT submissions.
//!
//! These types describe the submission record, the attachment values stored
//! in its sections, and the ephemeral job resources of the transfer protocol.
//! Records and attachments serialize as JSON via `serde`.

pub mod attachment;
pub mod job;
pub mod record;
