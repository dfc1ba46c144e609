use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use custody_core::audit::{AuditEvent, InMemoryAuditSink};
use custody_core::domain::approval::{ApprovalId, ApprovalRequest, ApproverId};
use custody_core::errors::ApplicationError;
use custody_core::orchestrator::{ApprovalDisposition, ApprovalOrchestrator};
use custody_core::store::{ApprovalStore, InMemoryApprovalStore};
use serde::{Deserialize, Serialize};

use crate::commands::{load_config, CommandResult};

/// A replayable approval flow. Each `[[steps]]` entry names one operation;
/// `submit` binds the created request to `ref` for later steps.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum Step {
    Submit {
        #[serde(rename = "ref")]
        alias: String,
        category: String,
        #[serde(default)]
        payload: String,
        requested_by: String,
        expect_error: Option<String>,
    },
    Approve {
        request: String,
        approver: String,
        comments: Option<String>,
        expect_error: Option<String>,
    },
    Reject {
        request: String,
        rejecter: String,
        #[serde(default)]
        reason: String,
        comments: Option<String>,
        expect_error: Option<String>,
    },
    Reassign {
        request: String,
        reassigner: String,
        to: String,
        reason: Option<String>,
        comments: Option<String>,
        expect_error: Option<String>,
    },
    Cancel {
        request: String,
        actor: String,
        reason: Option<String>,
        expect_error: Option<String>,
    },
}

impl Step {
    fn op(&self) -> &'static str {
        match self {
            Self::Submit { .. } => "submit",
            Self::Approve { .. } => "approve",
            Self::Reject { .. } => "reject",
            Self::Reassign { .. } => "reassign",
            Self::Cancel { .. } => "cancel",
        }
    }

    fn alias(&self) -> &str {
        match self {
            Self::Submit { alias, .. } => alias,
            Self::Approve { request, .. }
            | Self::Reject { request, .. }
            | Self::Reassign { request, .. }
            | Self::Cancel { request, .. } => request,
        }
    }

    fn expect_error(&self) -> Option<&str> {
        match self {
            Self::Submit { expect_error, .. }
            | Self::Approve { expect_error, .. }
            | Self::Reject { expect_error, .. }
            | Self::Reassign { expect_error, .. }
            | Self::Cancel { expect_error, .. } => expect_error.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
struct RunReport {
    command: &'static str,
    status: &'static str,
    steps: Vec<StepReport>,
    audit: Vec<AuditEvent>,
}

#[derive(Debug, Serialize)]
struct StepReport {
    index: usize,
    op: &'static str,
    request: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_message: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<StepOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<ApprovalRequest>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum StepOutcome {
    Disposition(ApprovalDisposition),
    Assigned { assigned_to: ApproverId },
}

enum StepFailure {
    Application(ApplicationError),
    UnknownRequest,
}

impl StepFailure {
    fn error_class(&self) -> &'static str {
        match self {
            Self::Application(error) => error.kind().as_str(),
            Self::UnknownRequest => "unknown_request",
        }
    }
}

impl From<ApplicationError> for StepFailure {
    fn from(error: ApplicationError) -> Self {
        Self::Application(error)
    }
}

pub fn run(config_path: Option<&Path>, script_path: &Path) -> CommandResult {
    let config = match load_config("run", config_path) {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let script = match load_script(script_path) {
        Ok(script) => script,
        Err(error) => return CommandResult::failure("run", "script", format!("{error:#}"), 3),
    };
    if script.steps.is_empty() {
        return CommandResult::success("run", "script contains no steps");
    }

    let sink = InMemoryAuditSink::default();
    let orchestrator = match ApprovalOrchestrator::from_config(&config) {
        Ok(orchestrator) => orchestrator.with_audit_sink(Arc::new(sink.clone())),
        Err(error) => {
            return CommandResult::failure("run", "config_validation", error.to_string(), 2)
        }
    };

    let mut runner = ScriptRunner {
        orchestrator,
        store: InMemoryApprovalStore::default(),
        aliases: HashMap::new(),
    };
    let steps: Vec<StepReport> = script
        .steps
        .iter()
        .enumerate()
        .map(|(index, step)| runner.execute(index, step))
        .collect();

    let failed = steps.iter().any(|step| step.status == "error");
    let report = RunReport {
        command: "run",
        status: if failed { "error" } else { "ok" },
        steps,
        audit: sink.events(),
    };
    CommandResult::report(u8::from(failed), &report)
}

pub fn load_script(path: &Path) -> anyhow::Result<Script> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read script `{}`", path.display()))?;
    let script: Script = toml::from_str(&raw)
        .with_context(|| format!("failed to parse script `{}`", path.display()))?;

    let mut submitted = HashSet::new();
    for (index, step) in script.steps.iter().enumerate() {
        if step.alias().trim().is_empty() {
            bail!("step {index} (`{}`) must name a request", step.op());
        }
        if let Step::Submit { alias, .. } = step {
            if !submitted.insert(alias.as_str()) {
                bail!("step {index} (`submit`) reuses ref `{alias}` bound by an earlier submit");
            }
        }
    }
    Ok(script)
}

struct ScriptRunner {
    orchestrator: ApprovalOrchestrator,
    store: InMemoryApprovalStore,
    aliases: HashMap<String, ApprovalId>,
}

impl ScriptRunner {
    fn execute(&mut self, index: usize, step: &Step) -> StepReport {
        let result = self.apply(step);
        let snapshot = self
            .aliases
            .get(step.alias())
            .and_then(|id| self.store.find_by_id(id));

        let mut report = StepReport {
            index,
            op: step.op(),
            request: step.alias().to_string(),
            status: "ok",
            error_class: None,
            message: None,
            user_message: None,
            outcome: None,
            snapshot,
        };

        match (result, step.expect_error()) {
            (Ok(outcome), None) => report.outcome = outcome,
            (Ok(outcome), Some(expected)) => {
                report.status = "error";
                report.outcome = outcome;
                report.error_class = Some("unexpected_success".to_string());
                report.message = Some(format!("expected `{expected}` but the step succeeded"));
            }
            (Err(failure), expected) => {
                let error_class = failure.error_class();
                report.status = if expected == Some(error_class) { "expected_error" } else { "error" };
                report.error_class = Some(error_class.to_string());
                match failure {
                    StepFailure::Application(error) => {
                        let interface = error.into_interface(format!("step-{index}"));
                        report.user_message = Some(interface.user_message());
                        report.message = Some(interface.to_string());
                    }
                    StepFailure::UnknownRequest => {
                        report.message =
                            Some(format!("no submitted request is bound to `{}`", step.alias()));
                    }
                }
            }
        }

        report
    }

    fn apply(&mut self, step: &Step) -> Result<Option<StepOutcome>, StepFailure> {
        if let Step::Submit { alias, category, payload, requested_by, .. } = step {
            let request = self.orchestrator.submit(
                category,
                payload.as_str(),
                &ApproverId::new(requested_by.as_str()),
            )?;
            let outcome = request
                .assigned_to()
                .cloned()
                .map(|assigned_to| StepOutcome::Assigned { assigned_to });
            self.aliases.insert(alias.clone(), request.id().clone());
            self.store.save(request);
            return Ok(outcome);
        }

        let mut request = self
            .aliases
            .get(step.alias())
            .and_then(|id| self.store.find_by_id(id))
            .ok_or(StepFailure::UnknownRequest)?;

        let outcome = match step {
            Step::Submit { .. } => None,
            Step::Approve { approver, comments, .. } => {
                let disposition = self.orchestrator.approve(
                    &mut request,
                    &ApproverId::new(approver.as_str()),
                    comments.clone(),
                )?;
                Some(StepOutcome::Disposition(disposition))
            }
            Step::Reject { rejecter, reason, comments, .. } => {
                self.orchestrator.reject(
                    &mut request,
                    &ApproverId::new(rejecter.as_str()),
                    reason,
                    comments.clone(),
                )?;
                None
            }
            Step::Reassign { reassigner, to, reason, comments, .. } => {
                let assigned_to = self.orchestrator.reassign(
                    &mut request,
                    &ApproverId::new(reassigner.as_str()),
                    &ApproverId::new(to.as_str()),
                    reason.clone(),
                    comments.clone(),
                )?;
                Some(StepOutcome::Assigned { assigned_to })
            }
            Step::Cancel { actor, reason, .. } => {
                request
                    .cancel(&ApproverId::new(actor.as_str()), reason.clone())
                    .map_err(ApplicationError::from)?;
                None
            }
        };

        self.store.save(request);
        Ok(outcome)
    }
}
