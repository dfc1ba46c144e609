use std::env;
use std::fs;
use std::path::Path;

use custody_core::config::{resolve_config_path, AppConfig};
use serde::Serialize;
use toml::Value;

use crate::commands::{load_config, CommandResult};

#[derive(Debug, Serialize)]
struct ConfigReport {
    command: &'static str,
    status: &'static str,
    precedence: &'static str,
    config_file: Option<String>,
    entries: Vec<ConfigEntry>,
}

#[derive(Debug, Serialize)]
struct ConfigEntry {
    key: &'static str,
    value: String,
    source: String,
}

pub fn run(config_path: Option<&Path>) -> CommandResult {
    let config = match load_config("config", config_path) {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let config_file_path = resolve_config_path(config_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let sources = SourceLookup { doc: config_file_doc.as_ref(), path: config_file_path.as_deref() };

    let report = ConfigReport {
        command: "config",
        status: "ok",
        precedence: "env > file > default",
        config_file: config_file_path.as_ref().map(|path| path.display().to_string()),
        entries: entries(&config, &sources),
    };
    CommandResult::report(0, &report)
}

fn entries(config: &AppConfig, sources: &SourceLookup<'_>) -> Vec<ConfigEntry> {
    let rules = &config.rules;
    vec![
        sources.entry(
            "logging.level",
            config.logging.level.clone(),
            &["CUSTODY_LOGGING_LEVEL", "CUSTODY_LOG_LEVEL"],
        ),
        sources.entry(
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["CUSTODY_LOGGING_FORMAT", "CUSTODY_LOG_FORMAT"],
        ),
        sources.entry(
            "resolution.provider_timeout_ms",
            config
                .resolution
                .provider_timeout_ms
                .map(|millis| millis.to_string())
                .unwrap_or_else(|| "<unbounded>".to_string()),
            &["CUSTODY_RESOLUTION_PROVIDER_TIMEOUT_MS"],
        ),
        sources.entry(
            "resolution.out_of_sequence",
            policy_label(config),
            &["CUSTODY_RESOLUTION_OUT_OF_SEQUENCE"],
        ),
        sources.entry("rules.sequences", format!("{} rule(s)", rules.sequences.len()), &[]),
        sources.entry(
            "rules.initial_assignments",
            format!("{} rule(s)", rules.initial_assignments.len()),
            &[],
        ),
        sources.entry(
            "rules.reassignment_allow_lists",
            format!("{} rule(s)", rules.reassignment_allow_lists.len()),
            &[],
        ),
    ]
}

fn policy_label(config: &AppConfig) -> String {
    serde_json::to_value(config.resolution.out_of_sequence)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| format!("{:?}", config.resolution.out_of_sequence))
}

struct SourceLookup<'a> {
    doc: Option<&'a Value>,
    path: Option<&'a Path>,
}

impl SourceLookup<'_> {
    fn entry(&self, key: &'static str, value: String, env_keys: &[&str]) -> ConfigEntry {
        ConfigEntry { key, value, source: self.source(key, env_keys) }
    }

    fn source(&self, key_path: &str, env_keys: &[&str]) -> String {
        // The loader skips blank values, so they never count as the source.
        if let Some(env_key) =
            env_keys.iter().find(|key| env::var(key).is_ok_and(|value| !value.trim().is_empty()))
        {
            return format!("env ({env_key})");
        }

        if let Some(doc) = self.doc {
            if contains_path(doc, key_path) {
                let file_path = self
                    .path
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|| "config file".to_string());
                return format!("file ({file_path})");
            }
        }

        "default".to_string()
    }
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}
