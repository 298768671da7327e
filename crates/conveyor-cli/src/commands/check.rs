//! `conveyor check` — validate a sync configuration without running it.

use std::path::Path;

use anyhow::{bail, Context, Result};

use conveyor_engine::validator::RecordSchemaValidator;

use crate::config::{parse_run_config, validate_run_config};

pub fn execute(sync_path: &Path) -> Result<()> {
    let config = parse_run_config(sync_path)?;
    validate_run_config(&config)?;
    tracing::info!("Sync configuration: OK");

    RecordSchemaValidator::new(&config.input.catalog, false)
        .context("stream schema does not compile")?;
    tracing::info!(
        streams = config.input.catalog.streams.len(),
        "Stream schemas: OK"
    );

    for (role, launch) in [
        ("source", &config.input.source),
        ("destination", &config.input.destination),
    ] {
        if !command_resolves(&launch.command) {
            bail!("{role} command '{}' not found", launch.command);
        }
        tracing::info!(role, command = %launch.command, "Connector command: OK");
    }

    let state_store = config.state_store_path();
    if let Some(parent) = state_store.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            tracing::warn!(
                path = %state_store.display(),
                "State store directory does not exist yet, it will be created on first write"
            );
        }
    }

    println!("OK");
    Ok(())
}

/// Absolute/relative paths must exist; bare names are searched in PATH.
fn command_resolves(command: &str) -> bool {
    let path = Path::new(command);
    if path.components().count() > 1 {
        return path.exists();
    }
    std::env::var_os("PATH")
        .map(|paths| {
            std::env::split_paths(&paths).any(|dir| dir.join(command).is_file())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sh_resolves_from_path() {
        assert!(command_resolves("sh"));
    }

    #[test]
    fn missing_command_does_not_resolve() {
        assert!(!command_resolves("definitely-not-a-real-binary-1234"));
        assert!(!command_resolves("/nonexistent/path/to/binary"));
    }
}
