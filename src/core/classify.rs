//! Maps collaborator failures onto the download error taxonomy.
//!
//! The remote service reports bot detection only through free-form error
//! text, so the signature list below is a heuristic that tracks the
//! extractor's wording. Keep every substring check in this file.

use super::error::DownloadError;
pub use crate::models::download::AttemptOutcome;

const ACCESS_DENIED_SIGNATURES: &[&str] = &[
    "http error 403",
    "http error 429",
    "403 forbidden",
    "429 too many requests",
    "forbidden",
    "too many requests",
    "sign in to confirm",
    "not a bot",
    "bot",
    "rate-limited",
    "rate limited",
];

const ACCESS_DENIED_STATUS_CODES: &[&str] = &["403", "429"];

pub fn is_access_denied(message: &str) -> bool {
    let lower = message.to_lowercase();
    if ACCESS_DENIED_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        return true;
    }
    lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| ACCESS_DENIED_STATUS_CODES.contains(&token))
}

pub fn classify_error(err: &anyhow::Error) -> DownloadError {
    if let Some(io) = err.downcast_ref::<std::io::Error>() {
        return DownloadError::Io(std::io::Error::new(io.kind(), io.to_string()));
    }
    let message = format!("{:#}", err);
    if is_access_denied(&message) {
        DownloadError::RetriableAccessDenied(message)
    } else {
        DownloadError::Extraction(message)
    }
}

pub fn outcome_of(err: &DownloadError) -> AttemptOutcome {
    match err {
        DownloadError::RetriableAccessDenied(_)
        | DownloadError::ArtifactTooSmall { .. }
        | DownloadError::ArtifactSizeMismatch { .. }
        | DownloadError::NoArtifactFound => AttemptOutcome::RetriableFailure,
        _ => AttemptOutcome::FatalFailure,
    }
}
