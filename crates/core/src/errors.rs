use thiserror::Error;

use crate::domain::approval::{ApprovalStatus, ApproverId};
use crate::rules::RuleDecision;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("`{operation}` is not valid while the request is {status:?}")]
    InvalidState { operation: &'static str, status: ApprovalStatus },
    #[error("`{actor}` is not the current assignee (assigned to {})", display_assignee(.assignee))]
    NotAssignee { actor: ApproverId, assignee: Option<ApproverId> },
    #[error("request is already assigned to `{assignee}`")]
    SameAssignee { assignee: ApproverId },
    #[error("rejection reason must not be blank")]
    EmptyReason,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("no rule provider reached a {decision} decision for item category `{item_category}`")]
    NoApplicableRule { decision: RuleDecision, item_category: String },
    #[error("rule provider `{provider}` exceeded its time budget during {decision} resolution for item category `{item_category}`")]
    ProviderTimedOut { decision: RuleDecision, provider: String, item_category: String },
    #[error("configuration failure: {0}")]
    Configuration(String),
}

/// Stable classification of every failure the core can raise.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidState,
    NotAssignee,
    NoApplicableRule,
    ProviderTimeout,
    SameAssignee,
    EmptyReason,
    Configuration,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidState => "invalid_state",
            Self::NotAssignee => "not_assignee",
            Self::NoApplicableRule => "no_applicable_rule",
            Self::ProviderTimeout => "provider_timeout",
            Self::SameAssignee => "same_assignee",
            Self::EmptyReason => "empty_reason",
            Self::Configuration => "configuration",
        }
    }
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::NotAssignee { .. } => ErrorKind::NotAssignee,
            Self::SameAssignee { .. } => ErrorKind::SameAssignee,
            Self::EmptyReason => ErrorKind::EmptyReason,
        }
    }
}

impl ApplicationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Domain(error) => error.kind(),
            Self::NoApplicableRule { .. } => ErrorKind::NoApplicableRule,
            Self::ProviderTimedOut { .. } => ErrorKind::ProviderTimeout,
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }
}

fn display_assignee(assignee: &Option<ApproverId>) -> String {
    match assignee {
        Some(assignee) => format!("`{assignee}`"),
        None => "nobody".to_owned(),
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Conflict { .. } => {
                "The approval request cannot accept this action in its current state."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let message = value.to_string();
        let correlation_id = "unassigned".to_owned();
        match value.kind() {
            ErrorKind::EmptyReason | ErrorKind::NotAssignee | ErrorKind::SameAssignee => {
                Self::BadRequest { message, correlation_id }
            }
            ErrorKind::InvalidState
            | ErrorKind::NoApplicableRule
            | ErrorKind::ProviderTimeout => Self::Conflict { message, correlation_id },
            ErrorKind::Configuration => Self::Internal { message, correlation_id },
        }
    }
}
