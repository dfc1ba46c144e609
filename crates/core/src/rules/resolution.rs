use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::domain::approval::{ApproverId, PayloadView};
use crate::errors::ApplicationError;
use crate::rules::{RuleDecision, RuleProvider, RuleRegistry};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResolutionOptions {
    /// Upper bound on a single provider call. A provider that runs over has
    /// its answer discarded and aborts resolution with
    /// [`ApplicationError::ProviderTimedOut`]; later providers are not asked.
    pub provider_budget: Option<Duration>,
}

/// Applies first-decision-wins precedence across each provider family.
#[derive(Clone, Debug)]
pub struct RuleResolver {
    registry: Arc<RuleRegistry>,
    options: ResolutionOptions,
}

impl RuleResolver {
    pub fn new(registry: Arc<RuleRegistry>, options: ResolutionOptions) -> Self {
        Self { registry, options }
    }

    pub fn with_options(mut self, options: ResolutionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    /// `Ok(None)` means no provider knows a sequence and callers may fall
    /// back to other rules. A timed-out provider is an error, never `None`.
    pub fn resolve_sequence(
        &self,
        payload: &PayloadView<'_>,
    ) -> Result<Option<Vec<ApproverId>>, ApplicationError> {
        first_decision(
            &self.options,
            RuleDecision::Sequence,
            payload,
            self.registry.list_sequence_providers(),
            |provider| provider.approval_sequence(payload).filter(|sequence| !sequence.is_empty()),
        )
    }

    /// The head of a recognized sequence wins over any initial assignment
    /// provider.
    pub fn resolve_initial_assignee(
        &self,
        payload: &PayloadView<'_>,
    ) -> Result<ApproverId, ApplicationError> {
        let sequence_head =
            self.resolve_sequence(payload)?.and_then(|sequence| sequence.into_iter().next());
        if let Some(first) = sequence_head {
            return Ok(first);
        }

        first_decision(
            &self.options,
            RuleDecision::InitialAssignment,
            payload,
            self.registry.list_initial_assignment_providers(),
            |provider| provider.initial_assignee(payload),
        )?
        .ok_or_else(|| no_applicable_rule(RuleDecision::InitialAssignment, payload))
    }

    pub fn resolve_reassignment(
        &self,
        payload: &PayloadView<'_>,
        current: &ApproverId,
        proposed: &ApproverId,
    ) -> Result<ApproverId, ApplicationError> {
        first_decision(
            &self.options,
            RuleDecision::Reassignment,
            payload,
            self.registry.list_reassignment_validators(),
            |validator| validator.validate_reassignment(payload, current, proposed),
        )?
        .ok_or_else(|| no_applicable_rule(RuleDecision::Reassignment, payload))
    }
}

fn first_decision<P, T>(
    options: &ResolutionOptions,
    decision: RuleDecision,
    payload: &PayloadView<'_>,
    providers: &[Box<P>],
    consult: impl Fn(&P) -> Option<T>,
) -> Result<Option<T>, ApplicationError>
where
    P: RuleProvider + ?Sized,
{
    for provider in providers.iter().filter(|provider| provider.supports(payload.item_category)) {
        let started = Instant::now();
        let outcome = consult(provider.as_ref());
        let elapsed = started.elapsed();

        if let Some(budget) = options.provider_budget {
            if elapsed > budget {
                warn!(
                    event_name = "rules.provider_over_budget",
                    decision = %decision,
                    provider = provider.name(),
                    item_category = payload.item_category,
                    elapsed_ms = millis(elapsed),
                    budget_ms = millis(budget),
                    "provider exceeded its time budget; aborting resolution"
                );
                return Err(ApplicationError::ProviderTimedOut {
                    decision,
                    provider: provider.name().to_owned(),
                    item_category: payload.item_category.to_owned(),
                });
            }
        }

        if outcome.is_some() {
            info!(
                event_name = "rules.decision_reached",
                decision = %decision,
                provider = provider.name(),
                item_category = payload.item_category,
                "rule provider reached a decision"
            );
            return Ok(outcome);
        }

        debug!(
            event_name = "rules.provider_undecided",
            decision = %decision,
            provider = provider.name(),
            item_category = payload.item_category,
            "rule provider returned no decision"
        );
    }

    debug!(
        event_name = "rules.providers_exhausted",
        decision = %decision,
        item_category = payload.item_category,
        "no provider reached a decision"
    );
    Ok(None)
}

fn no_applicable_rule(decision: RuleDecision, payload: &PayloadView<'_>) -> ApplicationError {
    ApplicationError::NoApplicableRule {
        decision,
        item_category: payload.item_category.to_owned(),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
