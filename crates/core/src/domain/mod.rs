pub mod approval;
pub mod event;

pub use approval::{ApprovalId, ApprovalRequest, ApprovalStatus, ApproverId, PayloadView};
pub use event::{ApprovalAction, ApprovalEvent};
