#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("request failed with code: {url} {status} {body}")]
    RequestFailed { url: String, status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Error: Missing required instance attribute: {0}")]
    MissingAttribute(String),
}
