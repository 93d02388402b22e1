//! Review workflow state machine.
//!
//! The single source of truth for which action may move a record from one
//! `(status, reviewer)` pair to the next. Everything here is pure: callers
//! pass a snapshot and get back either the next pair or a typed refusal.
//!
//! ```text
//! draft --submit--> review_ready --claim--> in_review --approve--> approved --publish--> minted
//!   ^                    ^                   |  |  |                   |
//!   |                    +-----release-------+  |  +--reject--> rejected
//!   +----------------request_revision-----------+                  |
//!   +-------------------------allow_revision-----------------------+
//! ```

use crate::errors::{RaftError, RaftResult};
use crate::models::record::{RecordStatus, SubmissionRecord};
use std::fmt;

/// The workflow-relevant slice of a record.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ReviewState {
    pub status: RecordStatus,
    pub reviewer: Option<String>,
}

/// An action requested by an author, reviewer or publisher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReviewAction {
    SubmitForReview,
    Claim { reviewer: String },
    Release { caller: String },
    Approve,
    Reject,
    RequestRevision,
    Publish,
    Reopen,
    AllowRevision,
}

impl ReviewAction {
    pub fn name(&self) -> &'static str {
        match self {
            ReviewAction::SubmitForReview => "submit_for_review",
            ReviewAction::Claim { .. } => "claim",
            ReviewAction::Release { .. } => "release",
            ReviewAction::Approve => "approve",
            ReviewAction::Reject => "reject",
            ReviewAction::RequestRevision => "request_revision",
            ReviewAction::Publish => "publish",
            ReviewAction::Reopen => "reopen",
            ReviewAction::AllowRevision => "allow_revision",
        }
    }
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl ReviewState {
    pub fn new(status: RecordStatus, reviewer: Option<String>) -> Self {
        Self {
            status,
            reviewer: reviewer.filter(|name| !name.trim().is_empty()),
        }
    }

    pub fn of(record: &SubmissionRecord) -> Self {
        Self::new(record.status, record.reviewer.clone())
    }

    /// A reviewer may only be recorded while the record is in review.
    pub fn is_consistent(&self) -> bool {
        self.reviewer.is_none() || self.status == RecordStatus::InReview
    }
}

/// Compute the state that `action` produces from `state`.
///
/// Never mutates `state`. Pairs missing from the transition table yield
/// `IllegalTransition`; a release by anyone other than the assigned reviewer
/// yields `NotAssignedReviewer`.
pub fn transition(state: &ReviewState, action: &ReviewAction) -> RaftResult<ReviewState> {
    use RecordStatus::*;

    let illegal = || RaftError::IllegalTransition {
        from: state.status,
        action: action.clone(),
    };

    let next = match (state.status, action) {
        (Draft, ReviewAction::SubmitForReview) => ReviewState::new(ReviewReady, None),

        (ReviewReady, ReviewAction::Claim { reviewer }) => {
            if state.reviewer.is_some() || reviewer.trim().is_empty() {
                return Err(illegal());
            }
            ReviewState::new(InReview, Some(reviewer.clone()))
        }

        (InReview, ReviewAction::Release { caller }) => {
            if state.reviewer.as_deref() != Some(caller.as_str()) {
                return Err(RaftError::NotAssignedReviewer {
                    caller: caller.clone(),
                    assigned: state.reviewer.clone(),
                });
            }
            ReviewState::new(ReviewReady, None)
        }

        (InReview, ReviewAction::Approve) => ReviewState::new(Approved, None),
        (InReview, ReviewAction::Reject) => ReviewState::new(Rejected, None),
        (InReview, ReviewAction::RequestRevision) => ReviewState::new(Draft, None),

        (Approved, ReviewAction::Publish) => ReviewState::new(Minted, None),
        (Approved, ReviewAction::Reopen) => ReviewState::new(InReview, state.reviewer.clone()),

        (Rejected, ReviewAction::AllowRevision) => ReviewState::new(Draft, None),

        _ => return Err(illegal()),
    };

    Ok(next)
}

/// Authors may edit a record's sections only in these statuses.
pub fn can_edit(status: RecordStatus) -> bool {
    matches!(status, RecordStatus::Draft | RecordStatus::Rejected)
}

pub fn can_delete(status: RecordStatus) -> bool {
    status == RecordStatus::Draft
}

pub fn can_submit(status: RecordStatus) -> bool {
    status == RecordStatus::Draft
}
