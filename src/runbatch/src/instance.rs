use anyhow::{bail, Context};
use rand::Rng;
use runbatch_common::{
    AGENT_URL_ATTRIBUTE, IMAGE_ATTRIBUTE, JSON_ENV_ATTRIBUTE, SECRET_JSON_ENVS_ATTRIBUTE,
};
use serde_json::{json, Value};
use tokio::process::Command;

/// Startup script written into the instance metadata; it downloads the
/// agent binary and execs it.
const STARTUP_SCRIPT: &str = include_str!("startup.sh");

const COS_IMAGE: &str = "projects/cos-cloud/global/images/family/cos-stable";

pub struct Input {
    pub project_id: String,
    pub zone: String,
    pub service_account: String,
    pub machine_prefix: String,
    pub image: String,
    pub json_env: String,
    pub secret_json_envs: Vec<String>,
    pub agent_url: String,
}

#[derive(Debug)]
pub struct Output {
    pub instance_name: String,
}

/**
 * This function starts the workload described by input on a transient GCE
 * VM instance. The instance deletes itself once the workload exits.
 */
pub async fn start(input: &Input) -> anyhow::Result<Output> {
    if input.project_id.is_empty() {
        bail!("project ID is required");
    }
    // The region is the zone minus its two-byte suffix, so the zone must be
    // ASCII for that slice to be well formed.
    if input.zone.len() < 3 || !input.zone.is_ascii() {
        bail!("invalid zone: {}", input.zone);
    }
    if input.service_account.is_empty() {
        bail!("service account is required");
    }
    if input.image.is_empty() {
        bail!("image is required");
    }

    let instance_name = new_instance_name(&input.machine_prefix);
    let body = instance_request(input, &instance_name);
    let token = access_token().await?;

    let url = format!(
        "https://compute.googleapis.com/compute/v1/projects/{}/zones/{}/instances",
        input.project_id, input.zone
    );
    let response = reqwest::Client::new()
        .post(&url)
        .bearer_auth(&token)
        .json(&body)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!(
            "instance insert failed with code: {url} {} {}",
            status.as_u16(),
            body.trim()
        );
    }

    Ok(Output { instance_name })
}

fn new_instance_name(machine_prefix: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("{machine_prefix}-{suffix:08x}")
}

fn instance_request(input: &Input, instance_name: &str) -> Value {
    // us-central1-a -> us-central1
    let region = &input.zone[..input.zone.len() - 2];

    json!({
        "name": instance_name,
        "machineType": format!(
            "projects/{}/zones/{}/machineTypes/e2-micro",
            input.project_id, input.zone
        ),
        "disks": [
            {
                "autoDelete": true,
                "boot": true,
                "type": "PERSISTENT",
                "initializeParams": {
                    "diskSizeGb": 10,
                    "diskType": format!(
                        "projects/{}/zones/{}/diskTypes/pd-balanced",
                        input.project_id, input.zone
                    ),
                    "sourceImage": COS_IMAGE,
                },
            }
        ],
        "networkInterfaces": [
            {
                "subnetwork": format!(
                    "projects/{}/regions/{}/subnetworks/default",
                    input.project_id, region
                ),
                "accessConfigs": [
                    {
                        "name": "External NAT",
                        "type": "ONE_TO_ONE_NAT",
                        "networkTier": "PREMIUM",
                    }
                ],
            }
        ],
        "metadata": {
            "items": [
                { "key": "startup-script", "value": STARTUP_SCRIPT },
                { "key": AGENT_URL_ATTRIBUTE, "value": input.agent_url },
                { "key": IMAGE_ATTRIBUTE, "value": input.image },
                { "key": JSON_ENV_ATTRIBUTE, "value": input.json_env },
                {
                    "key": SECRET_JSON_ENVS_ATTRIBUTE,
                    "value": input.secret_json_envs.join(","),
                },
            ],
        },
        "serviceAccounts": [
            {
                "email": input.service_account,
                "scopes": ["https://www.googleapis.com/auth/cloud-platform"],
            }
        ],
    })
}

// The launcher runs on a workstation, so it borrows the caller's gcloud
// credentials rather than carrying its own OAuth flow.
async fn access_token() -> anyhow::Result<String> {
    let output = Command::new("gcloud")
        .args(["auth", "print-access-token"])
        .output()
        .await
        .context("cannot run gcloud auth print-access-token")?;
    if !output.status.success() {
        bail!(
            "gcloud auth print-access-token failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8(output.stdout)?.trim().to_string())
}
