use serde::Deserialize;
use thiserror::Error;

/// Quota payload returned by the translation service alongside 429-class
/// failures.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QuotaDetail {
    pub limit: Option<u64>,
    pub used: Option<u64>,
    #[serde(rename = "resetDate")]
    pub reset_date: Option<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("local rate limit exceeded")]
    RateLimited,

    #[error("translation quota exceeded")]
    Quota {
        code: Option<String>,
        detail: Option<QuotaDetail>,
    },

    #[error("translation API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("cache error: {0}")]
    Cache(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("translation missing for '{0}'")]
    MissingTranslation(String),
}

impl TranslateError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TranslateError::Network(_) | TranslateError::Timeout(_) => true,
            TranslateError::Api { status, .. } => *status >= 500,
            TranslateError::Validation(_)
            | TranslateError::Cancelled
            | TranslateError::RateLimited
            | TranslateError::Quota { .. }
            | TranslateError::Cache(_)
            | TranslateError::Serialization(_)
            | TranslateError::MissingTranslation(_) => false,
        }
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, TranslateError::Quota { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TranslateError::Cancelled)
    }
}

impl From<serde_json::Error> for TranslateError {
    fn from(error: serde_json::Error) -> Self {
        TranslateError::Serialization(error.to_string())
    }
}

impl From<reqwest::Error> for TranslateError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TranslateError::Timeout(error.to_string())
        } else {
            TranslateError::Network(error.to_string())
        }
    }
}

pub type TranslateResult<T> = Result<T, TranslateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_errors_are_tagged_and_final() {
        let err = TranslateError::Quota {
            code: Some("quota_exceeded".to_string()),
            detail: None,
        };
        assert!(err.is_quota_exceeded());
        assert!(!err.is_retryable());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn transport_errors_are_retryable() {
        assert!(TranslateError::Network("connection reset".to_string()).is_retryable());
        assert!(TranslateError::Timeout("30s elapsed".to_string()).is_retryable());
        assert!(
            TranslateError::Api {
                status: 503,
                message: "unavailable".to_string()
            }
            .is_retryable()
        );
        assert!(
            !TranslateError::Api {
                status: 400,
                message: "bad request".to_string()
            }
            .is_retryable()
        );
    }

    #[test]
    fn cancellation_is_distinguishable() {
        let err = TranslateError::Cancelled;
        assert!(err.is_cancelled());
        assert!(!err.is_retryable());
    }
}
