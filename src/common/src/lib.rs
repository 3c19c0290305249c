pub mod error;

/// Instance attribute holding the docker image to run.
pub const IMAGE_ATTRIBUTE: &str = "runbatch-image";

/// Instance attribute holding an inline JSON object of environment variables.
pub const JSON_ENV_ATTRIBUTE: &str = "runbatch-json-env";

/// Instance attribute holding a comma separated list of Secret Manager
/// resource names whose payloads are JSON objects of environment variables.
pub const SECRET_JSON_ENVS_ATTRIBUTE: &str = "runbatch-secret-json-envs";

/// Instance attribute holding the URL the startup script downloads the
/// agent binary from.
pub const AGENT_URL_ATTRIBUTE: &str = "runbatch-agent-url";

/// Log id under which the agent writes batch output, i.e. the final path
/// segment of `projects/{project_id}/logs/{LOG_ID}`.
pub const LOG_ID: &str = "runbatch";

/// Severity vocabulary of the Cloud Logging entries:write API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Default,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Default => "DEFAULT",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_maps_to_api_vocabulary() {
        assert_eq!(Severity::Debug.as_str(), "DEBUG");
        assert_eq!(Severity::Info.as_str(), "INFO");
        assert_eq!(Severity::Warning.as_str(), "WARNING");
        assert_eq!(Severity::Error.as_str(), "ERROR");
        assert_eq!(Severity::Critical.as_str(), "CRITICAL");
        assert_eq!(Severity::Default.as_str(), "DEFAULT");
    }
}
