use thiserror::Error;

/// Failure reported by a Parser collaborator.
///
/// Cloneable so that a single job outcome can be handed to every caller
/// attached to the same in-flight entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScrapeError {
    #[error("captcha_required")]
    CaptchaRequired,

    #[error("Parser failed: {message}")]
    Failed { message: String },
}

impl ScrapeError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ReviewError {
    #[error("queue_full")]
    QueueFull,

    #[error("resource_pool_closed")]
    ResourcePoolClosed,

    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    #[error("Job for {key} ended without producing a result")]
    JobAborted { key: String },

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ReviewError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ReviewError::QueueFull | ReviewError::Scrape(ScrapeError::CaptchaRequired) => {
                ErrorSeverity::Medium
            }
            ReviewError::ValidationError { .. } => ErrorSeverity::Low,
            ReviewError::Scrape(_)
            | ReviewError::JobAborted { .. }
            | ReviewError::StorageError { .. }
            | ReviewError::HttpError(_)
            | ReviewError::SerializationError(_) => ErrorSeverity::High,
            ReviewError::ResourcePoolClosed
            | ReviewError::IoError(_)
            | ReviewError::ConfigError { .. }
            | ReviewError::MissingConfigError { .. }
            | ReviewError::InvalidConfigValueError { .. } => ErrorSeverity::Critical,
        }
    }

    /// Whether the same request may succeed if the caller backs off and retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReviewError::QueueFull
                | ReviewError::JobAborted { .. }
                | ReviewError::Scrape(ScrapeError::Failed { .. })
                | ReviewError::HttpError(_)
        )
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            ReviewError::QueueFull => "The parser queue is saturated, retry after a short delay",
            ReviewError::Scrape(ScrapeError::CaptchaRequired) => {
                "The source presented an anti-bot challenge, solve it in the browser profile or wait"
            }
            ReviewError::Scrape(ScrapeError::Failed { .. }) | ReviewError::JobAborted { .. } => {
                "Check the scraper worker logs and retry the request"
            }
            ReviewError::ResourcePoolClosed => "The service is shutting down, restart it",
            ReviewError::StorageError { .. } | ReviewError::IoError(_) => {
                "Check that the snapshot directory exists and is writable"
            }
            ReviewError::HttpError(_) => "Check that the scraper endpoint is reachable",
            ReviewError::SerializationError(_) => "The scraper returned malformed data",
            ReviewError::ConfigError { .. }
            | ReviewError::MissingConfigError { .. }
            | ReviewError::InvalidConfigValueError { .. } => {
                "Fix the configuration file or environment variables"
            }
            ReviewError::ValidationError { .. } => "Fix the request parameters",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            ReviewError::QueueFull => "Too many parse requests are pending".to_string(),
            ReviewError::Scrape(ScrapeError::CaptchaRequired) => {
                "The review source blocked the request with a captcha".to_string()
            }
            ReviewError::MissingConfigError { field } => {
                format!("Configuration value '{}' is required", field)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReviewError>;
