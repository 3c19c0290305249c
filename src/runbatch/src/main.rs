use clap::Parser;
use env_logger::Builder;
use runbatch_common::LOG_ID;

mod instance;

use crate::instance::{start, Input};

/// A tool for running a docker container in a transient GCE VM instance.
/// The instance is deleted once the container exits.
#[derive(Debug, Parser)]
#[command(name = "runbatch")]
struct Args {
    /// Project ID
    #[arg(long)]
    project_id: String,

    /// Zone name
    #[arg(long)]
    zone: String,

    // TODO: use the default compute service account if empty.
    /// Service account email
    #[arg(long)]
    service_account: String,

    /// Machine prefix
    #[arg(long, default_value = "runbatch")]
    machine_prefix: String,

    /// Environment variables in JSON format
    #[arg(long)]
    json_env: Option<String>,

    /// Secret containing environment variables in JSON format, repeatable
    #[arg(long = "secret-json-env")]
    secret_json_envs: Vec<String>,

    /// URL the instance downloads the runbatch-agent binary from
    #[arg(long)]
    agent_url: String,

    /// Fully qualified docker image name for the workload to run
    image: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize the logger
    Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let input = Input {
        project_id: args.project_id,
        zone: args.zone,
        service_account: args.service_account,
        machine_prefix: args.machine_prefix,
        image: args.image,
        json_env: args.json_env.unwrap_or_default(),
        secret_json_envs: args.secret_json_envs,
        agent_url: args.agent_url,
    };

    let output = start(&input).await?;

    println!(
        "Successfully started instance {}. To tail batch logs run:",
        output.instance_name
    );
    println!(
        "gcloud --project={0} logging tail 'logName=\"projects/{0}/logs/{1}\" AND resource.labels.instance_id=\"{2}\"' --format='get(text_payload)'",
        input.project_id, LOG_ID, output.instance_name
    );
    Ok(())
}
