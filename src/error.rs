use crate::{ansible::RenderError, kubevirt::ClientError};

#[derive(thiserror::Error, Debug)]
pub enum InventoryError {
    #[error("{0}")]
    InvalidConfig(String),

    #[error("{path} is not a valid kubevirt inventory file, expected a name ending in kubevirt.yml or kubevirt.yaml")]
    UnsupportedFile { path: String },

    #[error("Failed to set up the Kubernetes client: {0}")]
    ClientSetup(#[source] ClientError),

    #[error("Error fetching {kind} list: {message}")]
    Fetch { kind: String, message: String },

    #[error("{0}")]
    Compose(String),

    #[error("{0} is not a known host nor group")]
    UnknownEntity(String),

    #[error("{0} is not a known group")]
    UnknownGroup(String),

    #[error("Adding group {child} as child to {group} creates a recursive dependency loop")]
    GroupCycle { group: String, child: String },

    #[error(transparent)]
    RenderError(#[from] RenderError),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    JsonSerializationError(#[from] serde_json::Error),

    #[error(transparent)]
    YamlSerializationError(#[from] serde_yaml::Error),
}
