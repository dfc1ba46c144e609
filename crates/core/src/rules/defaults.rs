use crate::config::RuleSetConfig;
use crate::domain::approval::{ApproverId, PayloadView};
use crate::rules::{
    InitialAssignmentProvider, ReassignmentValidator, RuleProvider, RuleRegistry, SequenceProvider,
};

/// Maps each category it knows to a fixed approval path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StaticSequenceProvider {
    name: String,
    sequences: Vec<(String, Vec<ApproverId>)>,
}

impl StaticSequenceProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), sequences: Vec::new() }
    }

    pub fn with_sequence<I, A>(mut self, category: impl Into<String>, approvers: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<ApproverId>,
    {
        self.sequences.push((category.into(), approvers.into_iter().map(Into::into).collect()));
        self
    }
}

impl RuleProvider for StaticSequenceProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_categories(&self) -> Vec<String> {
        self.sequences.iter().map(|(category, _)| category.clone()).collect()
    }
}

impl SequenceProvider for StaticSequenceProvider {
    fn approval_sequence(&self, payload: &PayloadView<'_>) -> Option<Vec<ApproverId>> {
        self.sequences
            .iter()
            .find(|(category, _)| category == payload.item_category)
            .map(|(_, approvers)| approvers.clone())
    }
}

/// Assigns every request of the declared categories to one approver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FixedInitialAssignment {
    name: String,
    categories: Vec<String>,
    assignee: ApproverId,
}

impl FixedInitialAssignment {
    pub fn new<I, C>(name: impl Into<String>, categories: I, assignee: impl Into<ApproverId>) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        Self {
            name: name.into(),
            categories: categories.into_iter().map(Into::into).collect(),
            assignee: assignee.into(),
        }
    }
}

impl RuleProvider for FixedInitialAssignment {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_categories(&self) -> Vec<String> {
        self.categories.clone()
    }
}

impl InitialAssignmentProvider for FixedInitialAssignment {
    fn initial_assignee(&self, _payload: &PayloadView<'_>) -> Option<ApproverId> {
        Some(self.assignee.clone())
    }
}

/// Approves a proposed reassignment target only when it is on the allow-list.
/// The current approver is not considered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AllowListReassignmentValidator {
    name: String,
    categories: Vec<String>,
    allowed: Vec<ApproverId>,
}

impl AllowListReassignmentValidator {
    pub fn new<I, C, J, A>(name: impl Into<String>, categories: I, allowed: J) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
        J: IntoIterator<Item = A>,
        A: Into<ApproverId>,
    {
        Self {
            name: name.into(),
            categories: categories.into_iter().map(Into::into).collect(),
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

impl RuleProvider for AllowListReassignmentValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_categories(&self) -> Vec<String> {
        self.categories.clone()
    }
}

impl ReassignmentValidator for AllowListReassignmentValidator {
    fn validate_reassignment(
        &self,
        _payload: &PayloadView<'_>,
        _current: &ApproverId,
        proposed: &ApproverId,
    ) -> Option<ApproverId> {
        self.allowed.contains(proposed).then(|| proposed.clone())
    }
}

impl RuleRegistry {
    /// Registers the declarative rule set in declaration order.
    pub fn from_config(rules: &RuleSetConfig) -> Self {
        let mut registry = Self::new();

        if !rules.sequences.is_empty() {
            let provider = rules.sequences.iter().fold(
                StaticSequenceProvider::new("configured-sequences"),
                |provider, rule| {
                    provider.with_sequence(rule.category.clone(), rule.approvers.iter().map(String::as_str))
                },
            );
            registry = registry.register_sequence_provider(provider);
        }

        for (index, rule) in rules.initial_assignments.iter().enumerate() {
            registry = registry.register_initial_assignment_provider(FixedInitialAssignment::new(
                format!("initial-assignment[{index}]"),
                rule.categories.iter().cloned(),
                rule.assignee.as_str(),
            ));
        }

        for (index, rule) in rules.reassignment_allow_lists.iter().enumerate() {
            registry = registry.register_reassignment_validator(AllowListReassignmentValidator::new(
                format!("reassignment-allow-list[{index}]"),
                rule.categories.iter().cloned(),
                rule.approvers.iter().map(String::as_str),
            ));
        }

        registry
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{AllowListRule, InitialAssignmentRule, RuleSetConfig, SequenceRule};
    use crate::domain::approval::{ApproverId, PayloadView};
    use crate::rules::defaults::{
        AllowListReassignmentValidator, FixedInitialAssignment, StaticSequenceProvider,
    };
    use crate::rules::{
        InitialAssignmentProvider, ReassignmentValidator, RuleProvider, RuleRegistry,
        SequenceProvider,
    };

    const UNIVERSAL: &str = "UniversalApprovalRequest";

    fn payload(category: &str) -> PayloadView<'_> {
        PayloadView { item_category: category, raw_payload: r#"{"RequestName":"Budget"}"# }
    }

    #[test]
    fn static_sequence_supports_only_mapped_categories() {
        let provider = StaticSequenceProvider::new("paths")
            .with_sequence(UNIVERSAL, ["approver1", "approver2", "approver3"]);

        assert_eq!(provider.supported_categories(), vec![UNIVERSAL.to_owned()]);
        assert!(provider.supports(UNIVERSAL));
        assert!(!provider.supports("AnotherCategoryWithoutSequence"));
        assert_eq!(
            provider.approval_sequence(&payload(UNIVERSAL)),
            Some(vec![
                ApproverId::new("approver1"),
                ApproverId::new("approver2"),
                ApproverId::new("approver3"),
            ])
        );
        assert!(provider.approval_sequence(&payload("Other")).is_none());
    }

    #[test]
    fn fixed_assignment_always_decides_for_its_categories() {
        let provider = FixedInitialAssignment::new(
            "fallback",
            [UNIVERSAL, "AnotherCategoryWithoutSequence"],
            "manager_level1",
        );

        assert!(provider.supports("AnotherCategoryWithoutSequence"));
        assert_eq!(
            provider.initial_assignee(&payload("AnotherCategoryWithoutSequence")),
            Some(ApproverId::new("manager_level1"))
        );
    }

    #[test]
    fn allow_list_returns_proposed_target_only_when_listed() {
        let validator = AllowListReassignmentValidator::new(
            "common",
            [UNIVERSAL],
            ["approver1", "approver4", "SeniorAdminApprover"],
        );
        let current = ApproverId::new("approver1");

        assert_eq!(
            validator.validate_reassignment(&payload(UNIVERSAL), &current, &ApproverId::new("approver4")),
            Some(ApproverId::new("approver4"))
        );
        assert!(validator
            .validate_reassignment(&payload(UNIVERSAL), &current, &ApproverId::new("NonExistentUser"))
            .is_none());
    }

    #[test]
    fn registry_from_config_preserves_declaration_order() {
        let rules = RuleSetConfig {
            sequences: vec![SequenceRule {
                category: UNIVERSAL.to_owned(),
                approvers: vec!["approver1".to_owned(), "approver2".to_owned()],
            }],
            initial_assignments: vec![
                InitialAssignmentRule {
                    categories: vec![UNIVERSAL.to_owned()],
                    assignee: "approver1_fallback".to_owned(),
                },
                InitialAssignmentRule {
                    categories: vec!["Travel".to_owned()],
                    assignee: "travel_desk".to_owned(),
                },
            ],
            reassignment_allow_lists: vec![AllowListRule {
                categories: vec![UNIVERSAL.to_owned()],
                approvers: vec!["approver4".to_owned()],
            }],
        };

        let registry = RuleRegistry::from_config(&rules);

        assert_eq!(registry.list_sequence_providers().len(), 1);
        let names: Vec<&str> =
            registry.list_initial_assignment_providers().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["initial-assignment[0]", "initial-assignment[1]"]);
        assert_eq!(
            registry.list_reassignment_validators()[0].name(),
            "reassignment-allow-list[0]"
        );
        assert!(!registry.is_empty());
        assert!(RuleRegistry::from_config(&RuleSetConfig::default()).is_empty());
    }
}
