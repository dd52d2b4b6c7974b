use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Unified error type for strata operations
#[derive(Debug, Error)]
pub enum StrataError {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Queryable index errors
    #[error("SQL index error: {0}")]
    Sql(#[from] rusqlite::Error),

    // Config errors
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config serialize error: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,

    // Lookup errors
    #[error("Block not found: {0}")]
    BlockNotFound(String),

    #[error("Tree not found: {0}")]
    TreeNotFound(String),

    #[error("Notebook not found: {0}")]
    BoxNotFound(String),

    // Content errors
    #[error("Tree '{path}' is corrupted: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("Invalid tree file name '{0}'")]
    InvalidTreeName(PathBuf),
}

/// Result type alias for strata operations
pub type Result<T> = std::result::Result<T, StrataError>;

impl StrataError {
    /// Whether this error means "absent", which callers may recover from
    /// (close an editor tab, fall back to another lookup, ...).
    pub fn is_not_found(&self) -> bool {
        match self {
            StrataError::BlockNotFound(_)
            | StrataError::TreeNotFound(_)
            | StrataError::BoxNotFound(_) => true,
            StrataError::FileRead { source, .. } | StrataError::Io(source) => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }

    /// Convert to a serializable representation for IPC
    pub fn to_serializable(&self) -> SerializableError {
        SerializableError::from(self)
    }
}

/// A serializable representation of StrataError for IPC
#[derive(Debug, Clone, Serialize)]
pub struct SerializableError {
    /// Error kind/variant name
    pub kind: String,
    /// Human-readable error message
    pub message: String,
    /// Associated path (if applicable)
    pub path: Option<PathBuf>,
}

impl From<&StrataError> for SerializableError {
    fn from(err: &StrataError) -> Self {
        let kind = match err {
            StrataError::Io(_) => "Io",
            StrataError::FileRead { .. } => "FileRead",
            StrataError::FileWrite { .. } => "FileWrite",
            StrataError::Json(_) => "Json",
            StrataError::Sql(_) => "Sql",
            StrataError::ConfigParse(_) => "ConfigParse",
            StrataError::ConfigSerialize(_) => "ConfigSerialize",
            StrataError::NoConfigDir => "NoConfigDir",
            StrataError::BlockNotFound(_) => "BlockNotFound",
            StrataError::TreeNotFound(_) => "TreeNotFound",
            StrataError::BoxNotFound(_) => "BoxNotFound",
            StrataError::Corrupted { .. } => "Corrupted",
            StrataError::InvalidTreeName(_) => "InvalidTreeName",
        }
        .to_string();

        let path = match err {
            StrataError::FileRead { path, .. } => Some(path.clone()),
            StrataError::FileWrite { path, .. } => Some(path.clone()),
            StrataError::Corrupted { path, .. } => Some(path.clone()),
            StrataError::InvalidTreeName(path) => Some(path.clone()),
            _ => None,
        };

        Self {
            kind,
            message: err.to_string(),
            path,
        }
    }
}

impl From<StrataError> for SerializableError {
    fn from(err: StrataError) -> Self {
        SerializableError::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(StrataError::BlockNotFound("x".into()).is_not_found());
        assert!(StrataError::TreeNotFound("x".into()).is_not_found());
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(StrataError::Io(io).is_not_found());

        let corrupted = StrataError::Corrupted {
            path: PathBuf::from("/a.sy"),
            reason: "bad json".into(),
        };
        assert!(!corrupted.is_not_found());
    }

    #[test]
    fn test_serializable_error_carries_path() {
        let err = StrataError::Corrupted {
            path: PathBuf::from("/box/a.sy"),
            reason: "root is not a document".into(),
        };
        let ser = err.to_serializable();
        assert_eq!(ser.kind, "Corrupted");
        assert_eq!(ser.path, Some(PathBuf::from("/box/a.sy")));
        assert!(ser.message.contains("root is not a document"));
    }
}
