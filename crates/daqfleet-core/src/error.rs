use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DaqError {
    #[error("no hosts given: a command needs at least one target host")]
    EmptyHostList,

    #[error("unknown command verb: {0}")]
    UnknownVerb(String),

    #[error("unknown run direction '{0}': expected 'start' or 'stop'")]
    UnknownDirection(String),

    #[error("invalid '{verb}' command: {reason}")]
    InvalidCommand { verb: String, reason: String },

    #[error("host not in topology: {0}")]
    UnknownHost(String),

    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    #[error("topology file not found: {0}")]
    TopologyNotFound(String),

    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    #[error("launch failed: {0}")]
    Launch(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DaqError>;
