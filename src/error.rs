use thiserror::Error;

/// Raised while validating an instance configuration. A backend that fails
/// initialization never gets a poll loop; other instances are unaffected.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("field `{0}` is required")]
    MissingField(&'static str),
    #[error("`{0}` is not a valid http scheme")]
    InvalidScheme(String),
    #[error("`{0}` is not a valid label name")]
    InvalidLabelName(String),
    #[error("unknown output type `{0}`")]
    UnknownOutput(String),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("failed to load TLS material: {0}")]
    Tls(#[source] std::io::Error),
    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Any failure reaching or decoding a source during one poll. Never fatal to
/// the instance; the loop logs it and retries at the next tick.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Failure delivering the serialized document to the configured sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to serialize targets: {0}")]
    Serialize(#[from] serde_yaml::Error),
    #[error("failed to write output: {0}")]
    Io(#[from] std::io::Error),
}
