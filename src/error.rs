use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading configuration, synthesizing templates,
/// building artifacts or driving a deployment.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read config file {path:?}\n{source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path:?}\n{source}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid stack name {name}\n{restriction}")]
    InvalidStackName { name: String, restriction: String },

    #[error("Validation failed on resource '{resource}'\n{reason}")]
    InvalidResource { resource: String, reason: String },

    #[error("Duplicate logical id '{0}'. Every resource in a stack must have a unique name")]
    DuplicateResource(String),

    #[error("Resource '{resource}' references '{target}', which is not declared in the stack")]
    UnresolvedReference { resource: String, target: String },

    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("Failed to read assets from {path:?}\n{reason}")]
    Asset { path: PathBuf, reason: String },

    #[error("Build step failed: {command}\n{reason}")]
    Build { command: String, reason: String },

    #[error("Failed to deploy stack {stack}\n{reason}")]
    Deploy { stack: String, reason: String },

    #[error("Unknown stack '{0}'. Run `list` to see the configured stacks")]
    UnknownStack(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize template\n{0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(|p| p.to_path_buf()).unwrap_or_default();
        Error::Asset { path, reason: err.to_string() }
    }
}
