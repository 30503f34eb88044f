//! Error type for stack synthesis.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while assembling or writing the stack.
///
/// Unresolved cloud identifiers are not represented here: they are only
/// detected by the deploy tool when the template is applied.
#[derive(Error, Debug)]
pub enum StackError {
    /// Some, but not all, of the stack inputs were supplied.
    #[error("Missing context value: {0}")]
    MissingContext(String),

    /// The machine image map has no entry for the target region.
    #[error("No machine image mapped for region '{region}' (mapped: {mapped})")]
    ImageNotMapped { region: String, mapped: String },

    /// A lookup needs a concrete account and region.
    #[error("Environment required for {0}: set an account and region for the stack")]
    EnvironmentRequired(String),

    /// The looked-up network has no subnets of the requested type.
    #[error("There are no '{wanted}' subnet groups in this VPC. Available types: {available}")]
    NoSubnetsOfType { wanted: String, available: String },

    /// An artifact file could not be read.
    #[error("Failed to read asset {path}: {source}")]
    AssetRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Two constructs ended up with the same logical ID.
    #[error("Duplicate logical ID: {0}")]
    DuplicateLogicalId(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Filesystem error while writing the assembly.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StackError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = StackError> = std::result::Result<T, E>;
