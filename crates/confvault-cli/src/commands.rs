//! Subcommand handlers; one HTTP call each.

use anyhow::anyhow;
use serde_json::Value;

use crate::cli::{DeleteArgs, GetArgs, SetArgs, TargetArgs};
use crate::client::{AppContext, CliError, CliResult, classify_failure};
use crate::output::render_json;

pub(crate) async fn handle_set(ctx: &AppContext, args: &SetArgs) -> CliResult<()> {
    let service = require_service(&args.service)?;
    let data = parse_data(&args.data)?;
    let url = ctx.config_url(&[])?;
    let request = ctx
        .client
        .post(url)
        .json(&serde_json::json!({ "service": service, "data": data }));
    send(request).await
}

pub(crate) async fn handle_get(ctx: &AppContext, args: &GetArgs) -> CliResult<()> {
    let service = require_service(&args.service)?;
    let mut query = vec![("service", service.to_string())];
    if let Some(version) = args.version {
        query.push(("version", version.to_string()));
    }
    if args.extended {
        query.push(("extended", "true".to_string()));
    }
    let url = ctx.config_url(&query)?;
    send(ctx.client.get(url)).await
}

pub(crate) async fn handle_update(
    ctx: &AppContext,
    args: &TargetArgs,
    used: bool,
) -> CliResult<()> {
    let service = require_service(&args.service)?;
    let mut query = vec![("service", service.to_string())];
    if let Some(version) = args.version {
        query.push(("version", version.to_string()));
    }
    query.push(("used", used.to_string()));
    let url = ctx.config_url(&query)?;
    send(ctx.client.put(url)).await
}

pub(crate) async fn handle_delete(ctx: &AppContext, args: &DeleteArgs) -> CliResult<()> {
    let service = require_service(&args.service)?;
    let url = ctx.config_url(&[
        ("service", service.to_string()),
        ("version", args.version.to_string()),
    ])?;
    send(ctx.client.delete(url)).await
}

async fn send(request: reqwest::RequestBuilder) -> CliResult<()> {
    let response = request
        .send()
        .await
        .map_err(|err| CliError::failure(anyhow!("request to /config failed: {err}")))?;
    if !response.status().is_success() {
        return Err(classify_failure(response).await);
    }
    let body = response
        .json::<Value>()
        .await
        .map_err(|err| CliError::failure(anyhow!("failed to parse response: {err}")))?;
    render_json(&body)
}

fn require_service(raw: &str) -> CliResult<&str> {
    let service = raw.trim();
    if service.is_empty() {
        return Err(CliError::validation("--service must not be empty"));
    }
    Ok(service)
}

/// Accept a JSON object or an array of objects; the server does the merging.
fn parse_data(raw: &str) -> CliResult<Value> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| CliError::validation(format!("--data is not valid JSON: {err}")))?;
    let valid = match &value {
        Value::Object(_) => true,
        Value::Array(entries) => entries.iter().all(Value::is_object),
        _ => false,
    };
    if valid {
        Ok(value)
    } else {
        Err(CliError::validation(
            "--data must be a JSON object or an array of objects",
        ))
    }
}
