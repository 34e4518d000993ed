use crate::classifier::Platform;

/// Failures a single download request can end with.
///
/// Everything except [`Error::UnrecognizedUrl`] is caught at the pipeline
/// boundary, logged with the request context and turned into exactly one
/// message for the user.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no supported url found")]
    UnrecognizedUrl,

    #[error("{platform} extraction failed: {reason}")]
    Extraction { platform: Platform, reason: String },

    #[error("file size {size} bytes exceeds the limit of {max} bytes")]
    SizeLimit { size: u64, max: u64 },

    #[error("telegram rejected the payload: {0:#}")]
    Delivery(#[source] anyhow::Error),

    #[error("local filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request cancelled by shutdown")]
    Cancelled,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn extraction(platform: Platform, reason: impl std::fmt::Display) -> Self {
        Self::Extraction {
            platform,
            reason: reason.to_string(),
        }
    }

    /// Errors that deserve an `error` level log line.
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::Extraction { .. } | Self::Delivery(_) | Self::Io(_))
    }
}
