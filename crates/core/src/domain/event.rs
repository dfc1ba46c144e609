use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::ApproverId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Submit,
    Approve,
    Reject,
    Reassign,
    Cancel,
}

/// One action recorded against a request. Events are only ever appended by
/// [`ApprovalRequest`](crate::domain::approval::ApprovalRequest), never edited.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalEvent {
    pub timestamp: DateTime<Utc>,
    pub action: ApprovalAction,
    pub actor: ApproverId,
    pub from_approver: Option<ApproverId>,
    pub to_approver: Option<ApproverId>,
    pub reason: Option<String>,
    pub comments: Option<String>,
}

impl ApprovalEvent {
    pub(crate) fn new(action: ApprovalAction, actor: ApproverId, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            action,
            actor,
            from_approver: None,
            to_approver: None,
            reason: None,
            comments: None,
        }
    }

    pub(crate) fn with_from(mut self, approver: Option<ApproverId>) -> Self {
        self.from_approver = approver;
        self
    }

    pub(crate) fn with_to(mut self, approver: Option<ApproverId>) -> Self {
        self.to_approver = approver;
        self
    }

    pub(crate) fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason.filter(|value| !value.trim().is_empty());
        self
    }

    pub(crate) fn with_comments(mut self, comments: Option<String>) -> Self {
        self.comments = comments.filter(|value| !value.trim().is_empty());
        self
    }
}
