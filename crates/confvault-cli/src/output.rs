//! Output rendering for CLI commands.

use anyhow::anyhow;
use serde_json::Value;

use crate::client::{CliError, CliResult};

pub(crate) fn render_json(value: &Value) -> CliResult<()> {
    println!("{}", format_json(value)?);
    Ok(())
}

fn format_json(value: &Value) -> CliResult<String> {
    serde_json::to_string_pretty(value)
        .map_err(|err| CliError::failure(anyhow!("failed to format JSON: {err}")))
}
