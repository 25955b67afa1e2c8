use thiserror::Error;

use crate::version::Version;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed migration filename: {0}")]
    MalformedFilename(String),

    #[error("duplicate migration version {0}")]
    DuplicateVersion(Version),

    #[error("invalid migration {version}: {reason}")]
    InvalidMigration { version: Version, reason: String },

    #[error("unknown migration version {0}")]
    UnknownVersion(Version),

    #[error("migration {0} has no down operation")]
    NoDownOperation(Version),

    #[error("VERSION is required")]
    MissingVersion,

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("migration {version} ({name}) failed: {message}")]
    MigrationFailed {
        version: Version,
        name: String,
        message: String,
    },

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}
