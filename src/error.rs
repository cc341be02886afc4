use std::path::PathBuf;
use thiserror::Error;

/// Reasons an input is rejected before any decode work starts.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Unsupported file type: {0}")]
    BadExtension(String),

    #[error("File too large: {0} bytes. Maximum allowed: {1} bytes")]
    FileTooLarge(u64, u64),

    #[error("File content does not match its declared format: {0}")]
    SignatureMismatch(String),

    #[error("Invalid filename: {0}")]
    BadFilename(String),

    #[error("File is empty")]
    EmptyFile,
}

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    ImageProcessing(#[from] image::ImageError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Could not decode image: {0}")]
    Decode(String),

    #[error("Failed to encode {format}: {reason}")]
    Encode { format: String, reason: String },

    #[error("No backend available for {0}")]
    BackendUnavailable(String),

    #[error("Invalid quality value: {0}. Must be between {1} and {2}")]
    InvalidQuality(u8, u8, u8),

    #[error("Invalid image dimensions: {0}x{1}. Maximum allowed: {2}x{2}")]
    InvalidDimensions(u32, u32, u32),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Artifact has expired: {0}")]
    Expired(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Requested range not satisfiable for {0} byte file")]
    RangeNotSatisfiable(u64),

    #[error("Batch too large: {0} bytes. Maximum allowed: {1} bytes")]
    Capacity(u64, u64),

    #[error("Failed to create directory: {0}")]
    DirectoryCreationFailed(PathBuf),

    #[error("Walkdir error: {0}")]
    WalkdirError(#[from] walkdir::Error),

    #[error("HTTP response error: {0}")]
    Http(#[from] http::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OptimizerError {
    pub fn encode(format: impl Into<String>, reason: impl ToString) -> Self {
        OptimizerError::Encode {
            format: format.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error was raised before any decode work was attempted.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            OptimizerError::Validation(_)
                | OptimizerError::UnsupportedFormat(_)
                | OptimizerError::InvalidQuality(..)
                | OptimizerError::InvalidRequest(_)
        )
    }

    /// Status code the web layer should answer with.
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            OptimizerError::Validation(_)
            | OptimizerError::UnsupportedFormat(_)
            | OptimizerError::InvalidQuality(..)
            | OptimizerError::InvalidDimensions(..)
            | OptimizerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            OptimizerError::NotFound(_)
            | OptimizerError::Expired(_)
            | OptimizerError::FileNotFound(_) => StatusCode::NOT_FOUND,
            OptimizerError::AccessDenied(_) => StatusCode::FORBIDDEN,
            OptimizerError::RangeNotSatisfiable(_) => StatusCode::RANGE_NOT_SATISFIABLE,
            OptimizerError::Capacity(..) => StatusCode::PAYLOAD_TOO_LARGE,
            OptimizerError::Decode(_) | OptimizerError::ImageProcessing(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, OptimizerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_are_classified() {
        let err = OptimizerError::from(ValidationError::SignatureMismatch("png".into()));
        assert!(err.is_rejection());
        assert!(OptimizerError::UnsupportedFormat("heic".into()).is_rejection());
        assert!(!OptimizerError::Decode("truncated".into()).is_rejection());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            OptimizerError::Expired("a.jpg".into()).status_code(),
            http::StatusCode::NOT_FOUND
        );
        assert_eq!(
            OptimizerError::RangeNotSatisfiable(1000).status_code(),
            http::StatusCode::RANGE_NOT_SATISFIABLE
        );
        assert_eq!(
            OptimizerError::Capacity(200, 100).status_code(),
            http::StatusCode::PAYLOAD_TOO_LARGE
        );
    }
}
