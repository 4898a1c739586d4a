//! Error types and user facing notifications

use thiserror::Error;
use tracing::warn;

/// Failure to get a position out of the device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    #[error("location capability not supported")]
    Unsupported,
    #[error("location permission denied")]
    PermissionDenied,
    #[error("position unavailable")]
    PositionUnavailable,
    #[error("timed out waiting for a position")]
    Timeout,
}

impl AcquisitionError {
    /// Text meant for the person holding the device
    pub fn user_message(&self) -> &'static str {
        match self {
            AcquisitionError::Unsupported => {
                "Location services are not supported on this device."
            }
            AcquisitionError::PermissionDenied => {
                "Location access was denied. Allow location access for this app in your device settings to share your position."
            }
            AcquisitionError::PositionUnavailable => {
                "Your position could not be determined. Check that GPS is enabled and you have signal, then try again."
            }
            AcquisitionError::Timeout => {
                "Finding your position took too long. Please try again."
            }
        }
    }

    /// Whether calling start again may succeed without user action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AcquisitionError::PositionUnavailable | AcquisitionError::Timeout
        )
    }
}

/// Failure writing to or reading from a location store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage backend failed: {0}")]
    Backend(String),
    #[error("local store io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("local store encoding failed: {0}")]
    Encoding(#[from] serde_yaml::Error),
    #[error("store does not keep location history")]
    HistoryUnsupported,
    #[error("malformed stored record: {0}")]
    Malformed(String),
    #[cfg(feature = "mongo")]
    #[error("mongodb failed: {0}")]
    Mongo(#[from] mongodb::error::Error),
}

/// Surface for acquisition problems the user has to see
pub trait Notifier: Send + Sync {
    fn notify(&self, error: &AcquisitionError);
}

/// Notifier that only writes to the log
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, error: &AcquisitionError) {
        warn!(error = %error, "{}", error.user_message());
    }
}

#[cfg(test)]
mod tests {
    use super::AcquisitionError;

    #[test]
    fn distinct_messages() {
        let all = [
            AcquisitionError::Unsupported,
            AcquisitionError::PermissionDenied,
            AcquisitionError::PositionUnavailable,
            AcquisitionError::Timeout,
        ];

        for a in all {
            for b in all {
                if a != b {
                    assert_ne!(a.user_message(), b.user_message());
                }
            }
        }

        assert!(AcquisitionError::PermissionDenied
            .user_message()
            .contains("settings"));
    }

    #[test]
    fn retryable() {
        assert!(AcquisitionError::Timeout.is_retryable());
        assert!(AcquisitionError::PositionUnavailable.is_retryable());
        assert!(!AcquisitionError::PermissionDenied.is_retryable());
        assert!(!AcquisitionError::Unsupported.is_retryable());
    }
}
