use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum PdfChatError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Model backend error: {0}")]
    Backend(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, PdfChatError>;

impl PdfChatError {
    /// True for errors caused by what the user sent rather than by the backend
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidUpload(_) | Self::InvalidInput(_) | Self::InvalidState(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(PdfChatError::InvalidInput("empty".into()).is_client_error());
        assert!(PdfChatError::InvalidState("added".into()).is_client_error());
        assert!(!PdfChatError::Backend("down".into()).is_client_error());
        assert!(!PdfChatError::Pdf("bad xref".into()).is_client_error());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: PdfChatError = io.into();
        assert!(err.to_string().starts_with("I/O error"));
    }
}
