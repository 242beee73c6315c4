use thiserror::Error;

use crate::models::ClusterId;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    /// A config value is out of its accepted range.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Config I/O error for {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Config parse error for {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Lookup of an id the store never issued.
    #[error("Unknown cluster: {0}")]
    UnknownCluster(ClusterId),
}
