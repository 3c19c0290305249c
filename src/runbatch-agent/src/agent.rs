use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use log::{error, info};
use nix::unistd::{setgid, setuid, Group, User};
use runbatch_common::Severity;
use tokio::process::Command;

use crate::config::get_config_from_attributes;
use crate::docker::docker_run;
use crate::envfile::write_env_file;
use crate::logsink::{CloudLogSink, LogSink};
use crate::runtime::GceRuntime;

const BATCH_USER: &str = "runbatch";
const DOCKER_GROUP: &str = "docker";
const REGISTRY: &str = "us-central1-docker.pkg.dev";

/**
 * This function runs the whole single-shot batch lifecycle: bootstrap the
 * identity, run the container, and delete this VM instance no matter what
 * happened in between.
 */
pub async fn run() -> anyhow::Result<()> {
    // Without an identity there is no sink to report to and no instance to
    // delete, so a bootstrap failure aborts outright.
    let runtime = Arc::new(GceRuntime::bootstrap().await?);
    let sink = CloudLogSink::new(runtime.clone());

    let outcome = run_batch(&runtime, &sink).await;
    report_and_delete(&runtime, &sink, outcome).await
}

/// Reports a failed run through the sink, then deletes this instance. The
/// delete call is issued exactly once whether or not the run failed, and a
/// failure to report never blocks it.
async fn report_and_delete(
    runtime: &GceRuntime,
    sink: &dyn LogSink,
    outcome: anyhow::Result<()>,
) -> anyhow::Result<()> {
    if let Err(e) = outcome {
        let detail = format!("top level error in run: {e:#}");
        if let Err(emit_err) = sink.emit(Severity::Critical, &detail).await {
            error!("cannot report failure to Cloud Logging: {emit_err:#}");
        }
    }

    info!("Deleting instance {}", runtime.instance_name);
    runtime.delete_instance().await?;
    Ok(())
}

async fn run_batch(runtime: &GceRuntime, sink: &dyn LogSink) -> anyhow::Result<()> {
    // Root's home directory is read-only on COS, so docker credentials
    // cannot live under /root/.docker. Run docker as a dedicated user in
    // the docker group instead.
    create_batch_user().await?;
    drop_privileges()?;
    configure_docker_credentials().await?;

    let config = get_config_from_attributes(&runtime.attributes)?;
    let env_file = write_env_file(runtime, &config).await?;
    docker_run(sink, &config.image, env_file.path()).await?;
    // env_file drops here, which removes it whether or not the run failed.
    Ok(())
}

async fn create_batch_user() -> anyhow::Result<()> {
    let status = Command::new("useradd")
        .args(["-mg", DOCKER_GROUP, BATCH_USER])
        .status()
        .await
        .context("cannot run useradd")?;
    if !status.success() {
        bail!("failed to create user {BATCH_USER}");
    }
    Ok(())
}

fn drop_privileges() -> anyhow::Result<()> {
    let group = Group::from_name(DOCKER_GROUP)?
        .ok_or_else(|| anyhow!("group {DOCKER_GROUP} not found"))?;
    let user =
        User::from_name(BATCH_USER)?.ok_or_else(|| anyhow!("user {BATCH_USER} not found"))?;
    // Group first: after the uid changes we are not allowed to anymore.
    setgid(group.gid).context("setgid failed")?;
    setuid(user.uid).context("setuid failed")?;
    info!("Running as {BATCH_USER}:{DOCKER_GROUP}");
    Ok(())
}

async fn configure_docker_credentials() -> anyhow::Result<()> {
    let status = Command::new("docker-credential-gcr")
        .args(["configure-docker", "--registries", REGISTRY])
        .status()
        .await
        .context("cannot run docker-credential-gcr")?;
    if !status.success() {
        bail!("failed to configure docker credentials");
    }
    Ok(())
}
