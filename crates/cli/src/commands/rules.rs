use std::path::Path;

use custody_core::rules::{RuleProvider, RuleRegistry};
use serde::Serialize;

use crate::commands::{load_config, CommandResult};

#[derive(Debug, Serialize)]
struct RulesReport {
    command: &'static str,
    status: &'static str,
    sequence_providers: Vec<ProviderSummary>,
    initial_assignment_providers: Vec<ProviderSummary>,
    reassignment_validators: Vec<ProviderSummary>,
}

#[derive(Debug, Serialize)]
struct ProviderSummary {
    position: usize,
    name: String,
    categories: Vec<String>,
}

pub fn run(config_path: Option<&Path>) -> CommandResult {
    let config = match load_config("rules", config_path) {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let registry = RuleRegistry::from_config(&config.rules);
    let report = RulesReport {
        command: "rules",
        status: "ok",
        sequence_providers: summarize(registry.list_sequence_providers()),
        initial_assignment_providers: summarize(registry.list_initial_assignment_providers()),
        reassignment_validators: summarize(registry.list_reassignment_validators()),
    };
    CommandResult::report(0, &report)
}

fn summarize<P: RuleProvider + ?Sized>(providers: &[Box<P>]) -> Vec<ProviderSummary> {
    providers
        .iter()
        .enumerate()
        .map(|(position, provider)| ProviderSummary {
            position,
            name: provider.name().to_string(),
            categories: provider.supported_categories(),
        })
        .collect()
}
