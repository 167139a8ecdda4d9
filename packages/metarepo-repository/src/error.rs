use metarepo_index::IndexError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RepositoryError>;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("Query parse error: {0}")]
    QueryParse(String),

    #[error("This directory is already configured in the repository: {0}")]
    DuplicateDirectory(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RepositoryError {
    pub fn xml<E: std::fmt::Display>(e: E) -> Self {
        Self::Xml(e.to_string())
    }

    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }
}

/// Error raised by the record lifecycle API (`put_record`, `delete_record`,
/// `reindex_record`).
///
/// Carries a human-readable message only: callers may log it but must not
/// branch on its content.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct RecordUpdateError {
    pub message: String,
}

impl RecordUpdateError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<RepositoryError> for RecordUpdateError {
    fn from(err: RepositoryError) -> Self {
        RecordUpdateError::new(err.to_string())
    }
}

impl From<IndexError> for RecordUpdateError {
    fn from(err: IndexError) -> Self {
        RecordUpdateError::new(err.to_string())
    }
}

/// Machine-readable codes for collection API failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PutCollectionErrorCode {
    CollectionExistsInAnotherFormat,
    BadFormatSpecifier,
    BadKey,
    BadTitle,
    BadAdditionalMetadata,
    IoError,
    InternalError,
}

impl PutCollectionErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CollectionExistsInAnotherFormat => "COLLECTION_EXISTS_IN_ANOTHER_FORMAT",
            Self::BadFormatSpecifier => "BAD_FORMAT_SPECIFIER",
            Self::BadKey => "BAD_KEY",
            Self::BadTitle => "BAD_TITLE",
            Self::BadAdditionalMetadata => "BAD_ADDITIONAL_METADATA",
            Self::IoError => "IO_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for PutCollectionErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("[{code}] {message}")]
pub struct PutCollectionError {
    pub code: PutCollectionErrorCode,
    pub message: String,
}

impl PutCollectionError {
    pub fn new(code: PutCollectionErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// OAI protocol error codes, translated into wire-level error responses by
/// the protocol layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OAIErrorCode {
    BadArgument,
    CannotDisseminateFormat,
    IdDoesNotExist,
    NoRecordsMatch,
    NoSetHierarchy,
}

impl OAIErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadArgument => "badArgument",
            Self::CannotDisseminateFormat => "cannotDisseminateFormat",
            Self::IdDoesNotExist => "idDoesNotExist",
            Self::NoRecordsMatch => "noRecordsMatch",
            Self::NoSetHierarchy => "noSetHierarchy",
        }
    }
}

impl std::fmt::Display for OAIErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("[{code}] {message}")]
pub struct OAIError {
    pub code: OAIErrorCode,
    pub message: String,
}

impl OAIError {
    pub fn bad_argument(message: impl Into<String>) -> Self {
        Self {
            code: OAIErrorCode::BadArgument,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_update_error_message_only() {
        let err = RecordUpdateError::new("Format specified is null");
        assert_eq!(err.to_string(), "Format specified is null");
    }

    #[test]
    fn test_put_collection_error_display() {
        let err = PutCollectionError::new(PutCollectionErrorCode::BadKey, "key cannot be empty");
        let msg = err.to_string();
        assert!(msg.contains("BAD_KEY"));
        assert!(msg.contains("key cannot be empty"));
    }

    #[test]
    fn test_oai_error_code() {
        let err = OAIError::bad_argument("granularity mismatch");
        assert_eq!(err.code, OAIErrorCode::BadArgument);
        assert_eq!(err.code.as_str(), "badArgument");
    }

    #[test]
    fn test_repository_error_into_record_update_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: RecordUpdateError = RepositoryError::from(io).into();
        assert!(err.to_string().contains("denied"));
    }
}
