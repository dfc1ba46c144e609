//! Pluggable assignment strategies.
//!
//! Three independent provider families decide who handles a request next.
//! Each provider declares the item categories it supports; only those
//! providers are consulted, in registration order, and the first one to reach
//! a decision wins. Providers are registered explicitly at startup through a
//! [`RuleRegistry`] and are read-only afterwards.

pub mod defaults;
pub mod resolution;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApproverId, PayloadView};

pub use defaults::{AllowListReassignmentValidator, FixedInitialAssignment, StaticSequenceProvider};
pub use resolution::{ResolutionOptions, RuleResolver};

/// The kind of decision a provider family is consulted for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleDecision {
    Sequence,
    InitialAssignment,
    Reassignment,
}

impl fmt::Display for RuleDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sequence => "sequence",
            Self::InitialAssignment => "initial assignment",
            Self::Reassignment => "reassignment",
        })
    }
}

/// Behavior shared by every provider family.
pub trait RuleProvider: Send + Sync {
    /// Label used in logs and registry listings.
    fn name(&self) -> &str;
    fn supported_categories(&self) -> Vec<String>;

    fn supports(&self, item_category: &str) -> bool {
        self.supported_categories().iter().any(|category| category == item_category)
    }
}

/// Defines a fixed multi-step approval path for a category.
pub trait SequenceProvider: RuleProvider {
    /// `None` or an empty list both mean "no decision".
    fn approval_sequence(&self, payload: &PayloadView<'_>) -> Option<Vec<ApproverId>>;
}

pub trait InitialAssignmentProvider: RuleProvider {
    fn initial_assignee(&self, payload: &PayloadView<'_>) -> Option<ApproverId>;
}

/// Has the final say on reassignment targets. The returned approver is the
/// one actually applied and need not equal `proposed`.
pub trait ReassignmentValidator: RuleProvider {
    fn validate_reassignment(
        &self,
        payload: &PayloadView<'_>,
        current: &ApproverId,
        proposed: &ApproverId,
    ) -> Option<ApproverId>;
}

#[derive(Default)]
pub struct RuleRegistry {
    sequence_providers: Vec<Box<dyn SequenceProvider>>,
    initial_assignment_providers: Vec<Box<dyn InitialAssignmentProvider>>,
    reassignment_validators: Vec<Box<dyn ReassignmentValidator>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_sequence_provider<P>(mut self, provider: P) -> Self
    where
        P: SequenceProvider + 'static,
    {
        self.sequence_providers.push(Box::new(provider));
        self
    }

    pub fn register_initial_assignment_provider<P>(mut self, provider: P) -> Self
    where
        P: InitialAssignmentProvider + 'static,
    {
        self.initial_assignment_providers.push(Box::new(provider));
        self
    }

    pub fn register_reassignment_validator<V>(mut self, validator: V) -> Self
    where
        V: ReassignmentValidator + 'static,
    {
        self.reassignment_validators.push(Box::new(validator));
        self
    }

    pub fn list_sequence_providers(&self) -> &[Box<dyn SequenceProvider>] {
        &self.sequence_providers
    }

    pub fn list_initial_assignment_providers(&self) -> &[Box<dyn InitialAssignmentProvider>] {
        &self.initial_assignment_providers
    }

    pub fn list_reassignment_validators(&self) -> &[Box<dyn ReassignmentValidator>] {
        &self.reassignment_validators
    }

    pub fn is_empty(&self) -> bool {
        self.sequence_providers.is_empty()
            && self.initial_assignment_providers.is_empty()
            && self.reassignment_validators.is_empty()
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleRegistry")
            .field(
                "sequence_providers",
                &self.sequence_providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field(
                "initial_assignment_providers",
                &self.initial_assignment_providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field(
                "reassignment_validators",
                &self.reassignment_validators.iter().map(|v| v.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
