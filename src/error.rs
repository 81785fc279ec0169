//! Error types for spotctl
//!
//! Errors are classified so the region driver can keep going when a single
//! ASG fails: nothing here is fatal to the process except initialization
//! problems, which `main` maps to an exit code.

use thiserror::Error;

/// Main error type for spotctl
#[derive(Error, Debug)]
pub enum SpotctlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("EC2 API error: {operation} - {message}")]
    Ec2 {
        operation: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("AutoScaling API error: {operation} - {message}")]
    AutoScaling {
        operation: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    #[error("Auto Scaling group not found: {0}")]
    AsgNotFound(String),

    #[error("Spot request {0} missing an instance id")]
    SpotRequestIncomplete(String),

    #[error("Spot request {0} not fulfilled before the wait deadline")]
    WaitDeadline(String),

    #[error("Deadline exceeded while processing {0}")]
    DeadlineExceeded(String),

    #[error("Retryable error (attempt {attempt}/{max_attempts}): {reason}")]
    Retryable {
        attempt: u32,
        max_attempts: u32,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Validation error: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SpotctlError {
    /// Shorthand for EC2 call failures where only the message survives the
    /// SDK's generic error types.
    pub fn ec2(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        SpotctlError::Ec2 {
            operation: operation.into(),
            message: message.to_string(),
            source: None,
        }
    }

    /// Shorthand for AutoScaling call failures.
    pub fn autoscaling(operation: impl Into<String>, message: impl std::fmt::Display) -> Self {
        SpotctlError::AutoScaling {
            operation: operation.into(),
            message: message.to_string(),
            source: None,
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No regions configured")]
    NoRegions,

    #[error("Unknown region: {0}")]
    UnknownRegion(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Failed to parse {0}")]
    ParseError(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, SpotctlError>;

/// Trait for determining if an error is retryable
///
/// Consumed by `RetryPolicy` implementations to decide whether a failed
/// cloud call should be attempted again.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for SpotctlError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            SpotctlError::Ec2 { .. }
                | SpotctlError::AutoScaling { .. }
                | SpotctlError::Retryable { .. }
        )
    }
}
