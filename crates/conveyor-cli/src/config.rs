//! Sync YAML parsing with environment variable substitution.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;

use conveyor_types::sync::SyncInput;

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

/// A sync file: the engine input plus CLI-only settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    #[serde(flatten)]
    pub input: SyncInput,
    /// Where eagerly-committed states are written. Defaults to
    /// `~/.conveyor/state.json`.
    #[serde(default)]
    pub state_store: Option<PathBuf>,
}

impl RunConfig {
    pub fn state_store_path(&self) -> PathBuf {
        self.state_store.clone().unwrap_or_else(|| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".conveyor").join("state.json")
        })
    }
}

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error if any referenced environment variable is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut result = input.to_string();
    let mut missing = Vec::new();

    for cap in ENV_VAR_RE.captures_iter(input) {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(val) => {
                result = result.replace(&cap[0], &val);
            }
            Err(_) => {
                missing.push(var_name.to_string());
            }
        }
    }

    if !missing.is_empty() {
        bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(result)
}

/// Parse a sync YAML string (after env var substitution).
pub fn parse_run_config_str(yaml_str: &str) -> Result<RunConfig> {
    let substituted = substitute_env_vars(yaml_str)?;
    let config: RunConfig =
        serde_yaml::from_str(&substituted).context("Failed to parse sync YAML")?;
    Ok(config)
}

/// Parse a sync YAML file.
pub fn parse_run_config(path: &Path) -> Result<RunConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sync file: {}", path.display()))?;
    parse_run_config_str(&content)
}

/// Validate a parsed sync configuration.
/// Returns Ok(()) if valid, Err with all validation errors if not.
pub fn validate_run_config(config: &RunConfig) -> Result<()> {
    let mut errors = Vec::new();
    let input = &config.input;

    if input.job_id.trim().is_empty() {
        errors.push("job_id must not be empty".to_string());
    }
    if input.connection_id.trim().is_empty() {
        errors.push("connection_id must not be empty".to_string());
    }
    if input.source.command.trim().is_empty() {
        errors.push("Source command must not be empty".to_string());
    }
    if input.destination.command.trim().is_empty() {
        errors.push("Destination command must not be empty".to_string());
    }
    if input.catalog.streams.is_empty() {
        errors.push("Catalog must define at least one stream".to_string());
    }
    for (i, stream) in input.catalog.streams.iter().enumerate() {
        if stream.stream.name.trim().is_empty() {
            errors.push(format!("Stream {i} has an empty name"));
        }
        if !stream.json_schema.is_object() {
            errors.push(format!(
                "Stream '{}' has a non-object JSON schema",
                stream.stream
            ));
        }
    }
    if input.flags.heartbeat.enabled && input.flags.heartbeat.timeout_secs == 0 {
        errors.push("heartbeat.timeout_secs must be positive when the heartbeat is enabled".to_string());
    }
    if input.flags.commit_stats_asap && !input.flags.commit_state_asap {
        errors.push(
            "commit_stats_asap requires commit_state_asap (stats must not run ahead of states)"
                .to_string(),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Sync validation failed:\n  - {}", errors.join("\n  - "));
    }
}
