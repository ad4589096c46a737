use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Access denied by remote service: {0}")]
    RetriableAccessDenied(String),

    #[error("Downloaded file too small ({size} bytes, minimum {minimum})")]
    ArtifactTooSmall { size: u64, minimum: u64 },

    #[error("Downloaded file size mismatch (reported {reported} bytes, found {actual})")]
    ArtifactSizeMismatch { reported: u64, actual: u64 },

    #[error("Download finished but no media file was found")]
    NoArtifactFound,

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Download cancelled")]
    Cancelled,

    #[error("All download strategies failed after {attempted} attempt(s): {last_error}")]
    AllStrategiesExhausted { attempted: usize, last_error: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Failures that may clear up by re-running the same tier.
    pub fn is_validation_failure(&self) -> bool {
        matches!(
            self,
            DownloadError::ArtifactTooSmall { .. } | DownloadError::ArtifactSizeMismatch { .. }
        )
    }

    /// Errors allowed to cross into the web layer as the task's final outcome.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            DownloadError::InvalidInput(_)
                | DownloadError::AllStrategiesExhausted { .. }
                | DownloadError::Cancelled
        )
    }
}
