pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod orchestrator;
pub mod rules;
pub mod store;

pub use audit::{AuditEvent, AuditSink, InMemoryAuditSink};
pub use config::{AppConfig, ConfigError, LoadOptions, OutOfSequencePolicy};
pub use domain::{
    ApprovalAction, ApprovalEvent, ApprovalId, ApprovalRequest, ApprovalStatus, ApproverId,
    PayloadView,
};
pub use errors::{ApplicationError, DomainError, ErrorKind, InterfaceError};
pub use orchestrator::{ApprovalDisposition, ApprovalOrchestrator};
pub use rules::{
    InitialAssignmentProvider, ReassignmentValidator, RuleDecision, RuleProvider, RuleRegistry,
    SequenceProvider,
};
pub use store::{ApprovalStore, InMemoryApprovalStore};
