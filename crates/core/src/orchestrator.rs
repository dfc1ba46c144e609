use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn};
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use crate::config::{AppConfig, OutOfSequencePolicy};
use crate::domain::approval::{ApprovalId, ApprovalRequest, ApproverId};
use crate::errors::{ApplicationError, DomainError};
use crate::rules::{ResolutionOptions, RuleRegistry, RuleResolver};

/// Where an approval left the request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalDisposition {
    /// One step of the category's sequence was approved; the request moved on.
    Forwarded { next: ApproverId },
    /// The request reached its terminal Approved state.
    Approved { outside_sequence: bool },
}

/// The only entry point for callers.
///
/// Takes requests by `&mut`, so operations on one request are serialized by
/// the borrow checker; callers sharing requests across threads must guard
/// each aggregate themselves.
#[derive(Clone)]
pub struct ApprovalOrchestrator {
    resolver: RuleResolver,
    out_of_sequence: OutOfSequencePolicy,
    audit: Option<Arc<dyn AuditSink>>,
}

struct CallTrace {
    correlation_id: String,
    operation: &'static str,
    category: AuditCategory,
    actor: ApproverId,
    request_id: Option<ApprovalId>,
}

impl CallTrace {
    fn new(operation: &'static str, category: AuditCategory, actor: &ApproverId) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            operation,
            category,
            actor: actor.clone(),
            request_id: None,
        }
    }

    fn for_request(mut self, request: &ApprovalRequest) -> Self {
        self.request_id = Some(request.id().clone());
        self
    }
}

impl ApprovalOrchestrator {
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self {
            resolver: RuleResolver::new(registry, ResolutionOptions::default()),
            out_of_sequence: OutOfSequencePolicy::default(),
            audit: None,
        }
    }

    /// Builds the default rule set and resolution settings from `config`.
    /// Configs assembled by hand are validated the same way loaded ones are.
    pub fn from_config(config: &AppConfig) -> Result<Self, ApplicationError> {
        config.validate().map_err(|error| ApplicationError::Configuration(error.to_string()))?;

        Ok(Self::new(Arc::new(RuleRegistry::from_config(&config.rules)))
            .with_resolution_options(ResolutionOptions {
                provider_budget: config.resolution.provider_budget(),
            })
            .with_out_of_sequence_policy(config.resolution.out_of_sequence))
    }

    pub fn with_resolution_options(mut self, options: ResolutionOptions) -> Self {
        self.resolver = self.resolver.with_options(options);
        self
    }

    pub fn with_out_of_sequence_policy(mut self, policy: OutOfSequencePolicy) -> Self {
        self.out_of_sequence = policy;
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn registry(&self) -> &RuleRegistry {
        self.resolver.registry()
    }

    /// Creates a request and hands it to its first approver. No request is
    /// returned when no rule can name one.
    pub fn submit(
        &self,
        item_category: &str,
        payload: impl Into<String>,
        requested_by: &ApproverId,
    ) -> Result<ApprovalRequest, ApplicationError> {
        let trace = CallTrace::new("submit", AuditCategory::Submission, requested_by);
        let span = info_span!("approval", operation = trace.operation, correlation_id = %trace.correlation_id);
        let _entered = span.enter();

        let mut request = ApprovalRequest::new(item_category, payload, requested_by.clone());
        let assignee = self.resolver.resolve_initial_assignee(&request.payload_view());
        let result = assignee.and_then(|assignee| {
            request.set_initial_assignment(assignee, requested_by)?;
            Ok(request)
        });
        let trace = match &result {
            Ok(request) => trace.for_request(request),
            Err(_) => trace,
        };

        self.finish(trace, result, |request| {
            vec![
                ("item_category", request.item_category().to_owned()),
                ("to", request.assigned_to().map(ToString::to_string).unwrap_or_default()),
            ]
        })
    }

    pub fn approve(
        &self,
        request: &mut ApprovalRequest,
        approver: &ApproverId,
        comments: Option<String>,
    ) -> Result<ApprovalDisposition, ApplicationError> {
        let trace = CallTrace::new("approve", AuditCategory::Approval, approver).for_request(request);
        let span = info_span!("approval", operation = trace.operation, correlation_id = %trace.correlation_id);
        let _entered = span.enter();

        let result = self.apply_approval(request, approver, comments);
        self.finish(trace, result, |disposition| match disposition {
            ApprovalDisposition::Forwarded { next } => vec![("to", next.to_string())],
            ApprovalDisposition::Approved { outside_sequence } => {
                vec![("outside_sequence", outside_sequence.to_string())]
            }
        })
    }

    pub fn reject(
        &self,
        request: &mut ApprovalRequest,
        rejecter: &ApproverId,
        reason: &str,
        comments: Option<String>,
    ) -> Result<(), ApplicationError> {
        let trace = CallTrace::new("reject", AuditCategory::Rejection, rejecter).for_request(request);
        let span = info_span!("approval", operation = trace.operation, correlation_id = %trace.correlation_id);
        let _entered = span.enter();

        let result = request.reject(rejecter, reason, comments).map_err(ApplicationError::from);
        self.finish(trace, result, |_| vec![("reason", reason.to_owned())])
    }

    /// Returns the approver actually applied, which the validator may have
    /// chosen instead of `proposed`.
    ///
    /// `reassigner` is recorded but not authorized here; whether the current
    /// assignee alone may reassign is left to the registered validators.
    pub fn reassign(
        &self,
        request: &mut ApprovalRequest,
        reassigner: &ApproverId,
        proposed: &ApproverId,
        reason: Option<String>,
        comments: Option<String>,
    ) -> Result<ApproverId, ApplicationError> {
        let trace =
            CallTrace::new("reassign", AuditCategory::Reassignment, reassigner).for_request(request);
        let span = info_span!("approval", operation = trace.operation, correlation_id = %trace.correlation_id);
        let _entered = span.enter();

        let previous = request.assigned_to().cloned();
        let result = self.apply_reassignment(request, reassigner, proposed, reason, comments);
        self.finish(trace, result, |target| {
            vec![
                ("from", previous.as_ref().map(ToString::to_string).unwrap_or_default()),
                ("proposed", proposed.to_string()),
                ("to", target.to_string()),
            ]
        })
    }

    fn apply_approval(
        &self,
        request: &mut ApprovalRequest,
        approver: &ApproverId,
        comments: Option<String>,
    ) -> Result<ApprovalDisposition, ApplicationError> {
        if request.status().is_terminal() {
            return Err(DomainError::InvalidState { operation: "approve", status: request.status() }
                .into());
        }
        if !request.is_assigned_to(approver) {
            return Err(DomainError::NotAssignee {
                actor: approver.clone(),
                assignee: request.assigned_to().cloned(),
            }
            .into());
        }

        let Some(sequence) = self.resolver.resolve_sequence(&request.payload_view())? else {
            request.approve(approver, comments)?;
            return Ok(ApprovalDisposition::Approved { outside_sequence: false });
        };

        match sequence.iter().position(|member| member == approver) {
            Some(index) if index + 1 < sequence.len() => {
                let next = sequence[index + 1].clone();
                request.process_intermediate_approval(approver, next.clone(), comments)?;
                Ok(ApprovalDisposition::Forwarded { next })
            }
            Some(_) => {
                request.approve(approver, comments)?;
                Ok(ApprovalDisposition::Approved { outside_sequence: false })
            }
            None => self.apply_out_of_sequence(request, approver, &sequence, comments),
        }
    }

    fn apply_out_of_sequence(
        &self,
        request: &mut ApprovalRequest,
        approver: &ApproverId,
        sequence: &[ApproverId],
        comments: Option<String>,
    ) -> Result<ApprovalDisposition, ApplicationError> {
        match self.out_of_sequence {
            OutOfSequencePolicy::FinalApproval => {
                request.approve(approver, Some(out_of_sequence_comment(approver, comments)))?;
                Ok(ApprovalDisposition::Approved { outside_sequence: true })
            }
            OutOfSequencePolicy::RejoinSequence => {
                let approved: Vec<&ApproverId> = request.approvals_recorded().collect();
                let next = sequence.iter().find(|member| !approved.contains(member)).cloned();
                match next {
                    Some(next) => {
                        request.process_intermediate_approval(approver, next.clone(), comments)?;
                        Ok(ApprovalDisposition::Forwarded { next })
                    }
                    None => {
                        request.approve(approver, comments)?;
                        Ok(ApprovalDisposition::Approved { outside_sequence: true })
                    }
                }
            }
        }
    }

    fn apply_reassignment(
        &self,
        request: &mut ApprovalRequest,
        reassigner: &ApproverId,
        proposed: &ApproverId,
        reason: Option<String>,
        comments: Option<String>,
    ) -> Result<ApproverId, ApplicationError> {
        let invalid_state =
            || DomainError::InvalidState { operation: "reassign", status: request.status() };
        if request.status().is_terminal() {
            return Err(invalid_state().into());
        }
        let Some(current) = request.assigned_to().cloned() else {
            return Err(invalid_state().into());
        };
        if *proposed == current {
            return Err(DomainError::SameAssignee { assignee: current }.into());
        }

        let target =
            self.resolver.resolve_reassignment(&request.payload_view(), &current, proposed)?;
        request.reassign(reassigner, target.clone(), reason, comments)?;
        Ok(target)
    }

    fn finish<T>(
        &self,
        trace: CallTrace,
        result: Result<T, ApplicationError>,
        metadata: impl FnOnce(&T) -> Vec<(&'static str, String)>,
    ) -> Result<T, ApplicationError> {
        let request_id =
            trace.request_id.as_ref().map(ToString::to_string).unwrap_or_else(|| "none".to_owned());

        let event = match &result {
            Ok(value) => {
                info!(
                    event_name = "approval.transition_applied",
                    operation = trace.operation,
                    request_id = %request_id,
                    actor = %trace.actor,
                    "approval transition applied"
                );
                self.audit.as_ref().map(|_| {
                    metadata(value).into_iter().fold(
                        audit_event(&trace, "applied", AuditOutcome::Success),
                        |event, (key, entry)| event.with_metadata(key, entry),
                    )
                })
            }
            Err(error) => {
                warn!(
                    event_name = "approval.transition_rejected",
                    operation = trace.operation,
                    request_id = %request_id,
                    actor = %trace.actor,
                    error_class = error.kind().as_str(),
                    error = %error,
                    "approval transition rejected"
                );
                self.audit.as_ref().map(|_| {
                    audit_event(&trace, "rejected", AuditOutcome::Rejected)
                        .with_metadata("error_class", error.kind().as_str())
                        .with_metadata("error", error.to_string())
                })
            }
        };

        if let (Some(sink), Some(event)) = (&self.audit, event) {
            sink.emit(event);
        }
        result
    }
}

fn audit_event(trace: &CallTrace, suffix: &str, outcome: AuditOutcome) -> AuditEvent {
    AuditEvent::new(
        trace.request_id.clone(),
        trace.correlation_id.clone(),
        format!("approval.{}_{suffix}", trace.operation),
        trace.category.clone(),
        trace.actor.to_string(),
        outcome,
    )
}

fn out_of_sequence_comment(approver: &ApproverId, comments: Option<String>) -> String {
    let note = format!("approved by `{approver}` outside the defined approval sequence");
    match comments.filter(|comments| !comments.trim().is_empty()) {
        Some(comments) => format!("{comments} ({note})"),
        None => note,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crate::audit::{AuditOutcome, InMemoryAuditSink};
    use crate::config::{AppConfig, OutOfSequencePolicy};
    use crate::domain::approval::{ApprovalStatus, ApproverId, PayloadView};
    use crate::domain::event::ApprovalAction;
    use crate::errors::{ApplicationError, DomainError, ErrorKind};
    use crate::orchestrator::{ApprovalDisposition, ApprovalOrchestrator};
    use crate::rules::{
        AllowListReassignmentValidator, FixedInitialAssignment, ResolutionOptions, RuleDecision,
        RuleProvider, RuleRegistry, SequenceProvider, StaticSequenceProvider,
    };

    const UNIVERSAL: &str = "Universal";

    fn id(value: &str) -> ApproverId {
        ApproverId::new(value)
    }

    fn registry() -> RuleRegistry {
        RuleRegistry::new()
            .register_sequence_provider(
                StaticSequenceProvider::new("universal-path")
                    .with_sequence(UNIVERSAL, ["A1", "A2", "A3"]),
            )
            .register_initial_assignment_provider(FixedInitialAssignment::new(
                "no-sequence",
                ["Travel"],
                "travel_desk",
            ))
            .register_reassignment_validator(AllowListReassignmentValidator::new(
                "common",
                [UNIVERSAL, "Travel"],
                ["A1", "A2", "A3", "A4"],
            ))
    }

    fn orchestrator() -> ApprovalOrchestrator {
        ApprovalOrchestrator::new(Arc::new(registry()))
    }

    #[test]
    fn scenario_a_submit_assigns_head_of_sequence() {
        let request = orchestrator()
            .submit(UNIVERSAL, r#"{"RequestName":"P"}"#, &id("R"))
            .expect("submit");

        assert_eq!(request.assigned_to(), Some(&id("A1")));
        assert_eq!(request.status(), ApprovalStatus::Pending);
        assert_eq!(request.requested_by(), &id("R"));
        assert_eq!(request.history().len(), 1);
        let submit = &request.history()[0];
        assert_eq!(submit.action, ApprovalAction::Submit);
        assert_eq!(submit.actor, id("R"));
        assert_eq!(submit.to_approver, Some(id("A1")));
    }

    #[test]
    fn scenario_b_intermediate_approval_forwards_along_sequence() {
        let orchestrator = orchestrator();
        let mut request = orchestrator.submit(UNIVERSAL, "P", &id("R")).expect("submit");

        let disposition = orchestrator.approve(&mut request, &id("A1"), None).expect("approve");

        assert_eq!(disposition, ApprovalDisposition::Forwarded { next: id("A2") });
        assert_eq!(request.assigned_to(), Some(&id("A2")));
        assert_eq!(request.status(), ApprovalStatus::Pending);
        let event = request.history().last().expect("approve event");
        assert_eq!(event.action, ApprovalAction::Approve);
        assert_eq!(event.from_approver, Some(id("A1")));
        assert_eq!(event.to_approver, Some(id("A2")));
    }

    #[test]
    fn scenario_c_last_member_approval_is_final() {
        let orchestrator = orchestrator();
        let mut request = orchestrator.submit(UNIVERSAL, "P", &id("R")).expect("submit");
        orchestrator.approve(&mut request, &id("A1"), None).expect("A1");
        orchestrator.approve(&mut request, &id("A2"), None).expect("A2");

        let disposition = orchestrator.approve(&mut request, &id("A3"), None).expect("A3");

        assert_eq!(disposition, ApprovalDisposition::Approved { outside_sequence: false });
        assert!(request.assigned_to().is_none());
        assert_eq!(request.status(), ApprovalStatus::Approved);
        assert_eq!(request.history().len(), 4);
    }

    #[test]
    fn scenario_d_unapproved_reassignment_leaves_request_untouched() {
        let orchestrator = orchestrator();
        let mut request = orchestrator.submit(UNIVERSAL, "P", &id("R")).expect("submit");
        let before = request.clone();

        let error = orchestrator
            .reassign(&mut request, &id("A1"), &id("X"), Some("escalate".to_owned()), None)
            .expect_err("X is not allowed");

        assert_eq!(
            error,
            ApplicationError::NoApplicableRule {
                decision: RuleDecision::Reassignment,
                item_category: UNIVERSAL.to_owned(),
            }
        );
        assert_eq!(request, before);
    }

    #[test]
    fn scenario_e_allowed_reassignment_is_applied() {
        let orchestrator = orchestrator();
        let mut request = orchestrator.submit(UNIVERSAL, "P", &id("R")).expect("submit");

        let applied = orchestrator
            .reassign(&mut request, &id("A1"), &id("A4"), Some("expertise".to_owned()), None)
            .expect("A4 is allowed");

        assert_eq!(applied, id("A4"));
        assert_eq!(request.assigned_to(), Some(&id("A4")));
        assert_eq!(request.status(), ApprovalStatus::Reassigned);
        let event = request.history().last().expect("reassign event");
        assert_eq!(event.action, ApprovalAction::Reassign);
        assert_eq!(event.from_approver, Some(id("A1")));
        assert_eq!(event.to_approver, Some(id("A4")));
    }

    #[test]
    fn scenario_f_blank_rejection_reason_fails_without_mutation() {
        let orchestrator = orchestrator();
        let mut request = orchestrator.submit(UNIVERSAL, "P", &id("R")).expect("submit");
        let before = request.clone();

        let error =
            orchestrator.reject(&mut request, &id("A1"), "", None).expect_err("empty reason");

        assert_eq!(error, ApplicationError::Domain(DomainError::EmptyReason));
        assert_eq!(request, before);
    }

    #[test]
    fn reject_by_assignee_is_terminal() {
        let orchestrator = orchestrator();
        let mut request = orchestrator.submit(UNIVERSAL, "P", &id("R")).expect("submit");

        orchestrator
            .reject(&mut request, &id("A1"), "over budget", None)
            .expect("assignee rejects");

        assert_eq!(request.status(), ApprovalStatus::Rejected);
        assert!(request.assigned_to().is_none());
        let error = orchestrator
            .approve(&mut request, &id("A1"), None)
            .expect_err("terminal request cannot be approved");
        assert_eq!(error.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn reassigning_to_current_assignee_fails_with_same_assignee() {
        let orchestrator = orchestrator();
        let mut request = orchestrator.submit(UNIVERSAL, "P", &id("R")).expect("submit");

        let error = orchestrator
            .reassign(&mut request, &id("A1"), &id("A1"), None, None)
            .expect_err("same assignee");

        assert_eq!(error, ApplicationError::Domain(DomainError::SameAssignee { assignee: id("A1") }));
    }

    #[test]
    fn same_assignee_is_reported_before_validators_are_consulted() {
        let orchestrator = orchestrator();
        let mut request = orchestrator.submit("Travel", "{}", &id("R")).expect("submit");
        let before = request.clone();

        let error = orchestrator
            .reassign(&mut request, &id("travel_desk"), &id("travel_desk"), None, None)
            .expect_err("travel_desk already holds the request");

        assert_eq!(
            error,
            ApplicationError::Domain(DomainError::SameAssignee { assignee: id("travel_desk") })
        );
        assert_eq!(request, before);
    }

    #[test]
    fn approver_who_is_not_assigned_is_refused() {
        let orchestrator = orchestrator();
        let mut request = orchestrator.submit(UNIVERSAL, "P", &id("R")).expect("submit");
        let before = request.clone();

        let error =
            orchestrator.approve(&mut request, &id("A2"), None).expect_err("A2 is not assigned");

        assert_eq!(error.kind(), ErrorKind::NotAssignee);
        assert_eq!(request, before);
    }

    #[test]
    fn reassigned_sequence_member_forwards_to_their_successor() {
        let orchestrator = orchestrator();
        let mut request = orchestrator.submit(UNIVERSAL, "P", &id("R")).expect("submit");
        orchestrator.reassign(&mut request, &id("A1"), &id("A2"), None, None).expect("to A2");

        let disposition = orchestrator.approve(&mut request, &id("A2"), None).expect("A2");

        assert_eq!(disposition, ApprovalDisposition::Forwarded { next: id("A3") });
        assert_eq!(request.status(), ApprovalStatus::Pending);
    }

    #[test]
    fn out_of_sequence_approver_closes_request_with_annotation_by_default() {
        let orchestrator = orchestrator();
        let mut request = orchestrator.submit(UNIVERSAL, "P", &id("R")).expect("submit");
        orchestrator.reassign(&mut request, &id("A1"), &id("A4"), None, None).expect("to A4");

        let disposition = orchestrator
            .approve(&mut request, &id("A4"), Some("expert sign-off".to_owned()))
            .expect("A4");

        assert_eq!(disposition, ApprovalDisposition::Approved { outside_sequence: true });
        assert_eq!(request.status(), ApprovalStatus::Approved);
        let comments = request.history().last().and_then(|event| event.comments.clone());
        assert_eq!(
            comments.as_deref(),
            Some("expert sign-off (approved by `A4` outside the defined approval sequence)")
        );
    }

    #[test]
    fn out_of_sequence_approver_rejoins_sequence_when_configured() {
        let orchestrator =
            orchestrator().with_out_of_sequence_policy(OutOfSequencePolicy::RejoinSequence);
        let mut request = orchestrator.submit(UNIVERSAL, "P", &id("R")).expect("submit");
        orchestrator.approve(&mut request, &id("A1"), None).expect("A1");
        orchestrator.reassign(&mut request, &id("A2"), &id("A4"), None, None).expect("to A4");

        let disposition = orchestrator.approve(&mut request, &id("A4"), None).expect("A4");

        assert_eq!(disposition, ApprovalDisposition::Forwarded { next: id("A2") });
        assert_eq!(request.assigned_to(), Some(&id("A2")));
        assert_eq!(request.status(), ApprovalStatus::Pending);
    }

    #[test]
    fn category_without_sequence_uses_initial_assignment_and_single_approval() {
        let orchestrator = orchestrator();
        let mut request = orchestrator.submit("Travel", "{}", &id("R")).expect("submit");
        assert_eq!(request.assigned_to(), Some(&id("travel_desk")));

        let disposition =
            orchestrator.approve(&mut request, &id("travel_desk"), None).expect("approve");

        assert_eq!(disposition, ApprovalDisposition::Approved { outside_sequence: false });
        assert_eq!(request.status(), ApprovalStatus::Approved);
    }

    #[test]
    fn submit_without_any_applicable_rule_returns_no_request() {
        let error = orchestrator()
            .submit("Unknown", "{}", &id("R"))
            .expect_err("no provider handles Unknown");

        assert_eq!(
            error,
            ApplicationError::NoApplicableRule {
                decision: RuleDecision::InitialAssignment,
                item_category: "Unknown".to_owned(),
            }
        );
    }

    #[test]
    fn reassign_does_not_require_the_reassigner_to_be_assigned() {
        let orchestrator = orchestrator();
        let mut request = orchestrator.submit(UNIVERSAL, "P", &id("R")).expect("submit");

        orchestrator
            .reassign(&mut request, &id("SomeoneElse"), &id("A3"), None, None)
            .expect("authorization is left to validators");

        let event = request.history().last().expect("reassign event");
        assert_eq!(event.actor, id("SomeoneElse"));
        assert_eq!(request.assigned_to(), Some(&id("A3")));
    }

    #[test]
    fn reassign_on_terminal_request_is_invalid_state() {
        let orchestrator = orchestrator();
        let mut request = orchestrator.submit("Travel", "{}", &id("R")).expect("submit");
        orchestrator.approve(&mut request, &id("travel_desk"), None).expect("approve");

        let error = orchestrator
            .reassign(&mut request, &id("travel_desk"), &id("A1"), None, None)
            .expect_err("terminal");
        assert_eq!(error.kind(), ErrorKind::InvalidState);
    }

    struct CountingSequence(Arc<AtomicUsize>);

    impl RuleProvider for CountingSequence {
        fn name(&self) -> &str {
            "counting"
        }

        fn supported_categories(&self) -> Vec<String> {
            vec![UNIVERSAL.to_owned()]
        }
    }

    impl SequenceProvider for CountingSequence {
        fn approval_sequence(&self, _payload: &PayloadView<'_>) -> Option<Vec<ApproverId>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Some(vec![ApproverId::new("A1"), ApproverId::new("A2")])
        }
    }

    /// Answers `A1, A2` but stalls on every call from `slow_from` onward.
    struct StallingSequence {
        calls: Arc<AtomicUsize>,
        slow_from: usize,
    }

    impl RuleProvider for StallingSequence {
        fn name(&self) -> &str {
            "stalling"
        }

        fn supported_categories(&self) -> Vec<String> {
            vec![UNIVERSAL.to_owned()]
        }
    }

    impl SequenceProvider for StallingSequence {
        fn approval_sequence(&self, _payload: &PayloadView<'_>) -> Option<Vec<ApproverId>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) >= self.slow_from {
                thread::sleep(Duration::from_millis(30));
            }
            Some(vec![ApproverId::new("A1"), ApproverId::new("A2")])
        }
    }

    fn tight_budget() -> ResolutionOptions {
        ResolutionOptions { provider_budget: Some(Duration::from_millis(5)) }
    }

    #[test]
    fn approval_fails_when_the_sequence_provider_runs_over_budget() {
        let sink = InMemoryAuditSink::default();
        let orchestrator = ApprovalOrchestrator::new(Arc::new(
            RuleRegistry::new().register_sequence_provider(StallingSequence {
                calls: Arc::new(AtomicUsize::new(0)),
                slow_from: 1,
            }),
        ))
        .with_resolution_options(tight_budget())
        .with_audit_sink(Arc::new(sink.clone()));
        let mut request =
            orchestrator.submit(UNIVERSAL, "P", &id("R")).expect("first call is fast");
        let before = request.clone();

        let error = orchestrator
            .approve(&mut request, &id("A1"), None)
            .expect_err("a late sequence must not finalize the request");

        assert_eq!(error.kind(), ErrorKind::ProviderTimeout);
        assert_eq!(request, before);
        assert_eq!(request.status(), ApprovalStatus::Pending);
        let rejected = sink.events().pop().expect("approve audited");
        assert_eq!(rejected.event_type, "approval.approve_rejected");
        assert_eq!(
            rejected.metadata.get("error_class").map(String::as_str),
            Some("provider_timeout")
        );
    }

    #[test]
    fn submit_fails_instead_of_falling_back_when_the_sequence_runs_over_budget() {
        let orchestrator = ApprovalOrchestrator::new(Arc::new(
            RuleRegistry::new()
                .register_sequence_provider(StallingSequence {
                    calls: Arc::new(AtomicUsize::new(0)),
                    slow_from: 0,
                })
                .register_initial_assignment_provider(FixedInitialAssignment::new(
                    "fallback",
                    [UNIVERSAL],
                    "fallback_desk",
                )),
        ))
        .with_resolution_options(tight_budget());

        let error = orchestrator
            .submit(UNIVERSAL, "P", &id("R"))
            .expect_err("no request when the sequence provider times out");

        assert!(matches!(
            error,
            ApplicationError::ProviderTimedOut { decision: RuleDecision::Sequence, .. }
        ));
    }

    #[test]
    fn unauthorized_approval_does_not_consult_providers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let orchestrator = ApprovalOrchestrator::new(Arc::new(
            RuleRegistry::new().register_sequence_provider(CountingSequence(Arc::clone(&calls))),
        ));
        let mut request = orchestrator.submit(UNIVERSAL, "P", &id("R")).expect("submit");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let error =
            orchestrator.approve(&mut request, &id("A2"), None).expect_err("A2 is not assigned");
        assert_eq!(error.kind(), ErrorKind::NotAssignee);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn every_call_is_audited_including_failures() {
        let sink = InMemoryAuditSink::default();
        let orchestrator = orchestrator().with_audit_sink(Arc::new(sink.clone()));
        let mut request = orchestrator.submit(UNIVERSAL, "P", &id("R")).expect("submit");
        orchestrator
            .reassign(&mut request, &id("A1"), &id("X"), None, None)
            .expect_err("X is not on the allow-list");
        orchestrator.approve(&mut request, &id("A1"), None).expect("approve");

        let events = sink.events();
        let types: Vec<&str> = events.iter().map(|event| event.event_type.as_str()).collect();
        assert_eq!(
            types,
            vec!["approval.submit_applied", "approval.reassign_rejected", "approval.approve_applied"]
        );
        assert_eq!(events[0].request_id.as_ref(), Some(request.id()));
        assert_eq!(events[1].outcome, AuditOutcome::Rejected);
        assert_eq!(
            events[1].metadata.get("error_class").map(String::as_str),
            Some("no_applicable_rule")
        );
        assert_eq!(events[2].metadata.get("to").map(String::as_str), Some("A2"));
        assert_ne!(events[0].correlation_id, events[2].correlation_id);
    }

    #[test]
    fn orchestrator_built_from_config_honors_rule_set_and_policy() {
        let mut config = AppConfig::default();
        config.rules.sequences.push(crate::config::SequenceRule {
            category: UNIVERSAL.to_owned(),
            approvers: vec!["A1".to_owned(), "A2".to_owned()],
        });
        config.resolution.out_of_sequence = OutOfSequencePolicy::RejoinSequence;

        let orchestrator = ApprovalOrchestrator::from_config(&config).expect("valid config");
        let request = orchestrator.submit(UNIVERSAL, "P", &id("R")).expect("submit");

        assert_eq!(request.assigned_to(), Some(&id("A1")));
        assert_eq!(orchestrator.registry().list_sequence_providers().len(), 1);
    }

    #[test]
    fn orchestrator_refuses_invalid_hand_built_config() {
        let mut config = AppConfig::default();
        config.rules.sequences.push(crate::config::SequenceRule {
            category: UNIVERSAL.to_owned(),
            approvers: Vec::new(),
        });

        let error = ApprovalOrchestrator::from_config(&config).err().expect("empty sequence");
        assert_eq!(error.kind(), ErrorKind::Configuration);
        assert!(error.to_string().contains("rules.sequences[0].approvers"));
    }
}
