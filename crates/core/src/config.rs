use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub resolution: ResolutionConfig,
    pub rules: RuleSetConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolutionConfig {
    pub provider_timeout_ms: Option<u64>,
    pub out_of_sequence: OutOfSequencePolicy,
}

/// Declarative rule set. Declaration order is registration order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSetConfig {
    pub sequences: Vec<SequenceRule>,
    pub initial_assignments: Vec<InitialAssignmentRule>,
    pub reassignment_allow_lists: Vec<AllowListRule>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRule {
    pub category: String,
    pub approvers: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialAssignmentRule {
    pub categories: Vec<String>,
    pub assignee: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowListRule {
    pub categories: Vec<String>,
    pub approvers: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

/// What an approval by someone outside the category's sequence means.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutOfSequencePolicy {
    /// Close the request as approved, annotating the event.
    #[default]
    FinalApproval,
    /// Forward to the first sequence member without a recorded approval.
    RejoinSequence,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub provider_timeout_ms: Option<u64>,
    pub out_of_sequence: Option<OutOfSequencePolicy>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Compact }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl std::str::FromStr for OutOfSequencePolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "final_approval" => Ok(Self::FinalApproval),
            "rejoin_sequence" => Ok(Self::RejoinSequence),
            other => Err(ConfigError::Validation(format!(
                "unsupported out-of-sequence policy `{other}` (expected final_approval|rejoin_sequence)"
            ))),
        }
    }
}

impl ResolutionConfig {
    pub fn provider_budget(&self) -> Option<Duration> {
        self.provider_timeout_ms.map(Duration::from_millis)
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file || options.config_path.is_some() {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("custody.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(resolution) = patch.resolution {
            if let Some(provider_timeout_ms) = resolution.provider_timeout_ms {
                self.resolution.provider_timeout_ms = Some(provider_timeout_ms);
            }
            if let Some(out_of_sequence) = resolution.out_of_sequence {
                self.resolution.out_of_sequence = out_of_sequence;
            }
        }

        if let Some(rules) = patch.rules {
            self.rules = rules;
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        let log_level = read_env("CUSTODY_LOGGING_LEVEL").or_else(|| read_env("CUSTODY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CUSTODY_LOGGING_FORMAT").or_else(|| read_env("CUSTODY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        if let Some(value) = read_env("CUSTODY_RESOLUTION_PROVIDER_TIMEOUT_MS") {
            self.resolution.provider_timeout_ms =
                Some(parse_u64("CUSTODY_RESOLUTION_PROVIDER_TIMEOUT_MS", &value)?);
        }
        if let Some(value) = read_env("CUSTODY_RESOLUTION_OUT_OF_SEQUENCE") {
            self.resolution.out_of_sequence = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(provider_timeout_ms) = overrides.provider_timeout_ms {
            self.resolution.provider_timeout_ms = Some(provider_timeout_ms);
        }
        if let Some(out_of_sequence) = overrides.out_of_sequence {
            self.resolution.out_of_sequence = out_of_sequence;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_logging(&self.logging)?;
        validate_resolution(&self.resolution)?;
        validate_rules(&self.rules)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("custody.toml"), PathBuf::from("config/custody.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_resolution(resolution: &ResolutionConfig) -> Result<(), ConfigError> {
    if let Some(timeout_ms) = resolution.provider_timeout_ms {
        if timeout_ms == 0 || timeout_ms > 60_000 {
            return Err(ConfigError::Validation(
                "resolution.provider_timeout_ms must be in range 1..=60000".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_rules(rules: &RuleSetConfig) -> Result<(), ConfigError> {
    let mut seen_categories: Vec<&str> = Vec::new();
    for (index, rule) in rules.sequences.iter().enumerate() {
        let key = format!("rules.sequences[{index}]");
        require_non_blank(&rule.category, &format!("{key}.category"))?;
        if seen_categories.contains(&rule.category.as_str()) {
            return Err(ConfigError::Validation(format!(
                "{key}.category `{}` is declared more than once",
                rule.category
            )));
        }
        seen_categories.push(&rule.category);
        require_ids(&rule.approvers, &format!("{key}.approvers"))?;
    }

    for (index, rule) in rules.initial_assignments.iter().enumerate() {
        let key = format!("rules.initial_assignments[{index}]");
        require_ids(&rule.categories, &format!("{key}.categories"))?;
        require_non_blank(&rule.assignee, &format!("{key}.assignee"))?;
    }

    for (index, rule) in rules.reassignment_allow_lists.iter().enumerate() {
        let key = format!("rules.reassignment_allow_lists[{index}]");
        require_ids(&rule.categories, &format!("{key}.categories"))?;
        require_ids(&rule.approvers, &format!("{key}.approvers"))?;
    }

    Ok(())
}

fn require_non_blank(value: &str, key: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Validation(format!("{key} must not be blank")));
    }
    Ok(())
}

fn require_ids(values: &[String], key: &str) -> Result<(), ConfigError> {
    if values.is_empty() {
        return Err(ConfigError::Validation(format!("{key} must list at least one entry")));
    }
    if values.iter().any(|value| value.trim().is_empty()) {
        return Err(ConfigError::Validation(format!("{key} must not contain blank entries")));
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    logging: Option<LoggingPatch>,
    resolution: Option<ResolutionPatch>,
    rules: Option<RuleSetConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct ResolutionPatch {
    provider_timeout_ms: Option<u64>,
    out_of_sequence: Option<OutOfSequencePolicy>,
}
