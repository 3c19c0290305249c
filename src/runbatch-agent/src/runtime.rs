use std::collections::HashMap;

use log::info;
use reqwest::{Client, Method};
use runbatch_common::error::ApiError;
use serde_json::Value;

const METADATA_HOST: &str = "http://metadata.google.internal";
const TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const METADATA_URL: &str = "http://metadata.google.internal/computeMetadata/v1/?recursive=true";

const COMPUTE_BASE: &str = "https://www.googleapis.com";
const SECRETMANAGER_BASE: &str = "https://secretmanager.googleapis.com";

/// Client for the GCE metadata service and the Google Cloud APIs. The
/// access token is fetched once at bootstrap and never refreshed; the
/// process is short lived compared to the token.
pub struct GceRuntime {
    http: Client,
    access_token: String,
    // Base URLs are fields so tests can point them at a local stub.
    pub(crate) compute_base: String,
    pub(crate) secretmanager_base: String,
    pub instance_name: String,
    pub zone: String,
    pub project_id: String,
    pub attributes: HashMap<String, String>,
}

impl GceRuntime {
    /**
     * This function fetches the service account token and the instance
     * metadata and returns a ready to use runtime.
     */
    pub async fn bootstrap() -> Result<GceRuntime, ApiError> {
        let http = Client::new();

        // Fetch the token before anything else since every other API call
        // needs it.
        let token = call_api(&http, "", TOKEN_URL, None, Method::GET).await?;
        let access_token = token["access_token"]
            .as_str()
            .ok_or_else(|| {
                ApiError::UnexpectedResponse("token response has no access_token".into())
            })?
            .to_string();

        let metadata = call_api(&http, &access_token, METADATA_URL, None, Method::GET).await?;
        let instance = &metadata["instance"];
        let instance_name = required_str(instance, "name")?;
        let zone_resource = required_str(instance, "zone")?;
        let zone = zone_from_resource(&zone_resource).ok_or_else(|| {
            ApiError::UnexpectedResponse(format!("cannot parse zone from {zone_resource}"))
        })?;
        let project_id = required_str(&metadata["project"], "projectId")?;

        let mut attributes = HashMap::new();
        if let Some(map) = instance["attributes"].as_object() {
            for (key, value) in map {
                if let Some(value) = value.as_str() {
                    attributes.insert(key.clone(), value.to_string());
                }
            }
        }

        info!("Bootstrapped as instance {instance_name} in zone {zone}");

        Ok(GceRuntime {
            http,
            access_token,
            compute_base: COMPUTE_BASE.to_string(),
            secretmanager_base: SECRETMANAGER_BASE.to_string(),
            instance_name,
            zone,
            project_id,
            attributes,
        })
    }

    /// Generic authenticated call against a Google API. Metadata server
    /// requests carry the Metadata-Flavor header, everything else a bearer
    /// token. Non-2xx responses become an error carrying the URL, status
    /// and trimmed body.
    pub async fn call_api(
        &self,
        url: &str,
        body: Option<Value>,
        method: Method,
    ) -> Result<Value, ApiError> {
        call_api(&self.http, &self.access_token, url, body, method).await
    }

    /// Fetches a secret version payload from Secret Manager.
    pub async fn access_secret(&self, secret_name: &str) -> Result<Value, ApiError> {
        let url = format!("{}/v1/{secret_name}:access", self.secretmanager_base);
        self.call_api(&url, None, Method::GET).await
    }

    /// Deletes this VM instance. The compute API answers with an operation
    /// resource; the agent does not wait for it to complete.
    pub async fn delete_instance(&self) -> Result<(), ApiError> {
        let url = format!(
            "{}/compute/v1/projects/{}/zones/{}/instances/{}",
            self.compute_base, self.project_id, self.zone, self.instance_name
        );
        self.call_api(&url, None, Method::DELETE).await?;
        Ok(())
    }
}

async fn call_api(
    http: &Client,
    access_token: &str,
    url: &str,
    body: Option<Value>,
    method: Method,
) -> Result<Value, ApiError> {
    let mut request = http.request(method, url);
    if url.starts_with(METADATA_HOST) {
        request = request.header("Metadata-Flavor", "Google");
    } else if !access_token.is_empty() {
        request = request.bearer_auth(access_token);
    }
    if let Some(body) = &body {
        request = request.json(body);
    }

    let response = request
        .send()
        .await
        .map_err(|e| ApiError::Transport(e.to_string()))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ApiError::Transport(e.to_string()))?;
    if status != reqwest::StatusCode::OK {
        return Err(ApiError::RequestFailed {
            url: url.to_string(),
            status: status.as_u16(),
            body: body.trim().to_string(),
        });
    }

    serde_json::from_str(&body)
        .map_err(|e| ApiError::UnexpectedResponse(format!("invalid JSON from {url}: {e}")))
}

fn required_str(value: &Value, field: &str) -> Result<String, ApiError> {
    value[field]
        .as_str()
        .map(String::from)
        .ok_or_else(|| ApiError::UnexpectedResponse(format!("metadata has no {field} field")))
}

// Zone arrives as a resource path like projects/123/zones/us-central1-a.
fn zone_from_resource(resource: &str) -> Option<String> {
    resource.split('/').nth(3).map(String::from)
}

#[cfg(test)]
pub(crate) fn test_runtime(attributes: HashMap<String, String>) -> GceRuntime {
    GceRuntime {
        http: Client::new(),
        access_token: "test-token".into(),
        compute_base: COMPUTE_BASE.to_string(),
        secretmanager_base: SECRETMANAGER_BASE.to_string(),
        instance_name: "runbatch-0a1b2c3d".into(),
        zone: "us-central1-a".into(),
        project_id: "test-project".into(),
        attributes,
    }
}
