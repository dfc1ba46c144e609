use std::sync::{Arc, Mutex, MutexGuard};

use crate::domain::approval::{ApprovalId, ApprovalRequest, ApproverId};

/// Keeps requests between orchestrator calls. Implementations hold whole
/// aggregates; `save` replaces any stored request with the same id.
pub trait ApprovalStore: Send + Sync {
    fn save(&self, request: ApprovalRequest);
    fn find_by_id(&self, id: &ApprovalId) -> Option<ApprovalRequest>;
    /// Open requests currently waiting on `approver`.
    fn assigned_to(&self, approver: &ApproverId) -> Vec<ApprovalRequest>;
    fn requested_by(&self, requester: &ApproverId) -> Vec<ApprovalRequest>;
    fn all(&self) -> Vec<ApprovalRequest>;
}

/// Insertion-ordered store for scripts and tests.
#[derive(Clone, Default)]
pub struct InMemoryApprovalStore {
    requests: Arc<Mutex<Vec<ApprovalRequest>>>,
}

impl InMemoryApprovalStore {
    fn guard(&self) -> MutexGuard<'_, Vec<ApprovalRequest>> {
        match self.requests.lock() {
            Ok(requests) => requests,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn filtered(&self, keep: impl Fn(&ApprovalRequest) -> bool) -> Vec<ApprovalRequest> {
        self.guard().iter().filter(|request| keep(request)).cloned().collect()
    }
}

impl ApprovalStore for InMemoryApprovalStore {
    fn save(&self, request: ApprovalRequest) {
        let mut requests = self.guard();
        match requests.iter_mut().find(|stored| stored.id() == request.id()) {
            Some(stored) => *stored = request,
            None => requests.push(request),
        }
    }

    fn find_by_id(&self, id: &ApprovalId) -> Option<ApprovalRequest> {
        self.guard().iter().find(|request| request.id() == id).cloned()
    }

    fn assigned_to(&self, approver: &ApproverId) -> Vec<ApprovalRequest> {
        self.filtered(|request| request.status().is_open() && request.is_assigned_to(approver))
    }

    fn requested_by(&self, requester: &ApproverId) -> Vec<ApprovalRequest> {
        self.filtered(|request| request.requested_by() == requester)
    }

    fn all(&self) -> Vec<ApprovalRequest> {
        self.guard().clone()
    }
}
