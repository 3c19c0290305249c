use std::io::Write;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::info;
use runbatch_common::error::ApiError;
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::config::BatchConfig;
use crate::runtime::GceRuntime;

/// Materializes the configured environment blobs into a `KEY=value` file
/// for `docker run --env-file`: first each Secret Manager payload in the
/// configured order, then the inline blob. The returned guard deletes the
/// file when dropped, which also covers a partially written file when this
/// function errors out half way.
pub async fn write_env_file(
    runtime: &GceRuntime,
    config: &BatchConfig,
) -> anyhow::Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("runbatch")
        .suffix(".env")
        .tempfile()
        .context("cannot create env file")?;

    for secret_name in &config.secret_json_envs {
        let json_env = fetch_secret_json_env(runtime, secret_name).await?;
        append_json_env(file.as_file_mut(), &json_env)
            .with_context(|| format!("bad payload in secret {secret_name}"))?;
    }

    if let Some(json_env) = &config.json_env {
        append_json_env(file.as_file_mut(), json_env).context("bad inline json env")?;
    }

    file.as_file_mut().flush()?;
    info!("Wrote env file {}", file.path().display());
    Ok(file)
}

async fn fetch_secret_json_env(
    runtime: &GceRuntime,
    secret_name: &str,
) -> anyhow::Result<String> {
    let version = runtime.access_secret(secret_name).await?;
    let data = version["payload"]["data"].as_str().ok_or_else(|| {
        ApiError::UnexpectedResponse(format!("secret {secret_name} has no payload data"))
    })?;
    let payload = BASE64
        .decode(data)
        .with_context(|| format!("secret {secret_name} payload is not valid base64"))?;
    String::from_utf8(payload)
        .with_context(|| format!("secret {secret_name} payload is not valid UTF-8"))
}

// TODO: quote values so that $, double quotes or an embedded newline in a
// value survive whatever parses the file downstream.
fn append_json_env(out: &mut impl Write, json_env: &str) -> anyhow::Result<()> {
    let env: serde_json::Map<String, Value> = serde_json::from_str(json_env)?;
    for (key, value) in &env {
        match value {
            Value::String(text) => writeln!(out, "{key}={text}")?,
            other => writeln!(out, "{key}={other}")?,
        }
    }
    // Blank separator line between blobs
    writeln!(out)?;
    Ok(())
}
