use thiserror::Error;

/// Errors shared by validation and configuration loading, usable from both
/// the broker and the worker binaries.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("unknown domain: {0}")]
    UnknownDomain(String),

    #[error("domain {domain} does not start with any configured prefix")]
    BadPrefix { domain: String },

    #[error("domain suffixes are not unique: {0} collides with an existing suffix")]
    DuplicateSuffix(String),

    #[error("config validation failed: {0}")]
    InvalidConfig(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
}
