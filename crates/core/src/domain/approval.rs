use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::event::{ApprovalAction, ApprovalEvent};
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApprovalId(pub String);

impl ApprovalId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies a participant, human or role. Requesters and approvers share
/// this identifier space.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApproverId(pub String);

impl ApproverId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApproverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ApproverId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Reassigned,
    Approved,
    Rejected,
    Cancelled,
}

impl ApprovalStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled)
    }

    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }
}

/// Read-only view handed to rule providers. Providers never see the entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PayloadView<'a> {
    pub item_category: &'a str,
    pub raw_payload: &'a str,
}

/// Aggregate root for one approval request.
///
/// Every mutating operation validates all of its preconditions before touching
/// any field, so a failed call leaves the request exactly as it was. While the
/// request is open it has exactly one assignee (once submitted); terminal
/// requests have none and accept no further mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ApprovalRequest {
    id: ApprovalId,
    item_category: String,
    payload: String,
    status: ApprovalStatus,
    assigned_to: Option<ApproverId>,
    requested_by: ApproverId,
    created_at: DateTime<Utc>,
    history: Vec<ApprovalEvent>,
}

impl ApprovalRequest {
    pub fn new(
        item_category: impl Into<String>,
        payload: impl Into<String>,
        requested_by: ApproverId,
    ) -> Self {
        Self {
            id: ApprovalId::generate(),
            item_category: item_category.into(),
            payload: payload.into(),
            status: ApprovalStatus::Pending,
            assigned_to: None,
            requested_by,
            created_at: Utc::now(),
            history: Vec::new(),
        }
    }

    pub fn id(&self) -> &ApprovalId {
        &self.id
    }

    pub fn item_category(&self) -> &str {
        &self.item_category
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn payload_view(&self) -> PayloadView<'_> {
        PayloadView { item_category: &self.item_category, raw_payload: &self.payload }
    }

    pub fn status(&self) -> ApprovalStatus {
        self.status
    }

    pub fn assigned_to(&self) -> Option<&ApproverId> {
        self.assigned_to.as_ref()
    }

    pub fn requested_by(&self) -> &ApproverId {
        &self.requested_by
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn history(&self) -> &[ApprovalEvent] {
        &self.history
    }

    pub fn is_assigned_to(&self, approver: &ApproverId) -> bool {
        self.assigned_to.as_ref() == Some(approver)
    }

    pub fn set_initial_assignment(
        &mut self,
        assignee: ApproverId,
        actor: &ApproverId,
    ) -> Result<(), DomainError> {
        const OPERATION: &str = "set_initial_assignment";

        let submitted = self.history.iter().any(|event| event.action == ApprovalAction::Submit);
        if self.status != ApprovalStatus::Pending || self.assigned_to.is_some() || submitted {
            return Err(DomainError::InvalidState { operation: OPERATION, status: self.status });
        }

        let event = ApprovalEvent::new(ApprovalAction::Submit, actor.clone(), self.next_timestamp())
            .with_to(Some(assignee.clone()))
            .with_comments(Some("initial submission and assignment".to_owned()));
        self.history.push(event);
        self.assigned_to = Some(assignee);
        Ok(())
    }

    /// Records an approval for one step of a multi-step path and hands the
    /// request to `next_approver`. The request stays open.
    pub fn process_intermediate_approval(
        &mut self,
        current_approver: &ApproverId,
        next_approver: ApproverId,
        comments: Option<String>,
    ) -> Result<(), DomainError> {
        self.ensure_open("process_intermediate_approval")?;
        self.ensure_assignee(current_approver)?;

        let event =
            ApprovalEvent::new(ApprovalAction::Approve, current_approver.clone(), self.next_timestamp())
                .with_from(Some(current_approver.clone()))
                .with_to(Some(next_approver.clone()))
                .with_comments(comments);
        self.history.push(event);
        self.assigned_to = Some(next_approver);
        self.status = ApprovalStatus::Pending;
        Ok(())
    }

    pub fn approve(
        &mut self,
        approver: &ApproverId,
        comments: Option<String>,
    ) -> Result<(), DomainError> {
        self.ensure_open("approve")?;
        self.ensure_assignee(approver)?;

        let event = ApprovalEvent::new(ApprovalAction::Approve, approver.clone(), self.next_timestamp())
            .with_from(Some(approver.clone()))
            .with_comments(comments);
        self.history.push(event);
        self.assigned_to = None;
        self.status = ApprovalStatus::Approved;
        Ok(())
    }

    pub fn reject(
        &mut self,
        rejecter: &ApproverId,
        reason: impl Into<String>,
        comments: Option<String>,
    ) -> Result<(), DomainError> {
        self.ensure_open("reject")?;
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(DomainError::EmptyReason);
        }
        self.ensure_assignee(rejecter)?;

        let event = ApprovalEvent::new(ApprovalAction::Reject, rejecter.clone(), self.next_timestamp())
            .with_from(Some(rejecter.clone()))
            .with_reason(Some(reason))
            .with_comments(comments);
        self.history.push(event);
        self.assigned_to = None;
        self.status = ApprovalStatus::Rejected;
        Ok(())
    }

    /// Moves the request to `new_assignee`.
    ///
    /// `reassigner` is recorded as the actor but is not checked against the
    /// current assignee here; that authorization belongs to the caller or to
    /// a reassignment validator.
    pub fn reassign(
        &mut self,
        reassigner: &ApproverId,
        new_assignee: ApproverId,
        reason: Option<String>,
        comments: Option<String>,
    ) -> Result<(), DomainError> {
        const OPERATION: &str = "reassign";

        self.ensure_open(OPERATION)?;
        let Some(current) = self.assigned_to.as_ref() else {
            return Err(DomainError::InvalidState { operation: OPERATION, status: self.status });
        };
        if *current == new_assignee {
            return Err(DomainError::SameAssignee { assignee: new_assignee });
        }

        let event = ApprovalEvent::new(ApprovalAction::Reassign, reassigner.clone(), self.next_timestamp())
            .with_from(Some(current.clone()))
            .with_to(Some(new_assignee.clone()))
            .with_reason(reason)
            .with_comments(comments);
        self.history.push(event);
        self.assigned_to = Some(new_assignee);
        self.status = ApprovalStatus::Reassigned;
        Ok(())
    }

    /// External cancellation. Not reachable through the orchestrator.
    pub fn cancel(
        &mut self,
        actor: &ApproverId,
        reason: Option<String>,
    ) -> Result<(), DomainError> {
        self.ensure_open("cancel")?;

        let event = ApprovalEvent::new(ApprovalAction::Cancel, actor.clone(), self.next_timestamp())
            .with_from(self.assigned_to.clone())
            .with_reason(reason);
        self.history.push(event);
        self.assigned_to = None;
        self.status = ApprovalStatus::Cancelled;
        Ok(())
    }

    /// Approvers who have recorded an approval on this request, in order.
    pub fn approvals_recorded(&self) -> impl Iterator<Item = &ApproverId> {
        self.history
            .iter()
            .filter(|event| event.action == ApprovalAction::Approve)
            .map(|event| &event.actor)
    }

    fn ensure_open(&self, operation: &'static str) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::InvalidState { operation, status: self.status });
        }
        Ok(())
    }

    fn ensure_assignee(&self, actor: &ApproverId) -> Result<(), DomainError> {
        if !self.is_assigned_to(actor) {
            return Err(DomainError::NotAssignee {
                actor: actor.clone(),
                assignee: self.assigned_to.clone(),
            });
        }
        Ok(())
    }

    // Clock skew must never reorder history.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.history.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        }
    }
}
