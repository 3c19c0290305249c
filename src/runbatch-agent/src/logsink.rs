use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::Method;
use runbatch_common::{Severity, LOG_ID};

use crate::runtime::GceRuntime;

const ENTRIES_WRITE_URL: &str = "https://logging.googleapis.com/v2/entries:write";

/// Narrow logging capability the rest of the agent depends on. Emits are
/// awaited at the call site, so a failed write surfaces there instead of
/// being dropped.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn emit(&self, severity: Severity, text: &str) -> anyhow::Result<()>;
}

/// Sink that forwards each record to Cloud Logging, one entries:write call
/// per record. Records are mirrored to the local logger so the serial
/// console shows the same stream.
pub struct CloudLogSink {
    runtime: Arc<GceRuntime>,
}

impl CloudLogSink {
    pub fn new(runtime: Arc<GceRuntime>) -> CloudLogSink {
        CloudLogSink { runtime }
    }

    fn entry_body(&self, severity: Severity, text: &str) -> serde_json::Value {
        serde_json::json!({
            "logName": format!("projects/{}/logs/{}", self.runtime.project_id, LOG_ID),
            "resource": {
                "type": "gce_instance",
                "labels": {
                    "instance_id": self.runtime.instance_name,
                    "project_id": self.runtime.project_id,
                    "zone": self.runtime.zone,
                },
            },
            "entries": [
                {
                    "severity": severity.as_str(),
                    "textPayload": text,
                }
            ],
        })
    }
}

#[async_trait]
impl LogSink for CloudLogSink {
    async fn emit(&self, severity: Severity, text: &str) -> anyhow::Result<()> {
        match severity {
            Severity::Error | Severity::Critical => error!("{text}"),
            Severity::Warning => warn!("{text}"),
            Severity::Debug => debug!("{text}"),
            _ => info!("{text}"),
        }

        self.runtime
            .call_api(ENTRIES_WRITE_URL, Some(self.entry_body(severity, text)), Method::POST)
            .await?;
        Ok(())
    }
}

/// Sink that records emitted entries in memory, for tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) records: std::sync::Mutex<Vec<(Severity, String)>>,
}

#[cfg(test)]
#[async_trait]
impl LogSink for RecordingSink {
    async fn emit(&self, severity: Severity, text: &str) -> anyhow::Result<()> {
        self.records
            .lock()
            .unwrap()
            .push((severity, text.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::test_runtime;
    use std::collections::HashMap;

    #[test]
    fn entry_body_names_log_and_instance_resource() {
        let sink = CloudLogSink::new(Arc::new(test_runtime(HashMap::new())));
        let body = sink.entry_body(Severity::Error, "boom");

        assert_eq!(body["logName"], "projects/test-project/logs/runbatch");
        assert_eq!(body["resource"]["type"], "gce_instance");
        assert_eq!(body["resource"]["labels"]["instance_id"], "runbatch-0a1b2c3d");
        assert_eq!(body["resource"]["labels"]["project_id"], "test-project");
        assert_eq!(body["resource"]["labels"]["zone"], "us-central1-a");
        assert_eq!(body["entries"][0]["severity"], "ERROR");
        assert_eq!(body["entries"][0]["textPayload"], "boom");
    }
}
