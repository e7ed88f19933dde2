//! Error types for reconciliation.
//!
//! Errors are categorized so the engine can decide what to retry, what to
//! isolate to one subsystem, and what advice to show the user.

use crate::types::{ItemId, Operation, SubsystemId, SubsystemTier};
use std::time::Duration;
use thiserror::Error;

/// Categories of reconciliation errors for retry logic and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network-related errors (transient, retryable)
    Network,
    /// The ecosystem's tool is missing or not usable on this host
    Unavailable,
    /// An adapter call exceeded its deadline
    Timeout,
    /// Subsystem or item does not exist
    NotFound,
    /// Permission denied
    Permission,
    /// Persisted manifest or baseline could not be parsed
    Corrupt,
    /// The caller asked for something illegal (wrong tier, duplicate id)
    Caller,
    /// Disagreement that needs a human decision
    Conflict,
    /// Other/unknown errors
    Other,
}

impl ErrorCategory {
    /// Whether this error category is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network)
    }

    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Network => "Network connectivity issue",
            Self::Unavailable => "Backend unavailable",
            Self::Timeout => "Backend timed out",
            Self::NotFound => "Not found",
            Self::Permission => "Permission denied",
            Self::Corrupt => "Corrupt persisted state",
            Self::Caller => "Invalid request",
            Self::Conflict => "Unresolved conflict",
            Self::Other => "Unexpected error",
        }
    }

    /// Get actionable advice for resolving this error category.
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Network => "Check your internet connection and try again",
            Self::Unavailable => "Install the ecosystem's tool or disable the subsystem in config",
            Self::Timeout => "Raise --timeout or check whether the tool is hanging",
            Self::NotFound => "Run `strata subsystems` to list registered subsystems",
            Self::Permission => "Check permissions or run with appropriate access",
            Self::Corrupt => "Fix the file by hand or re-run `strata capture` for the subsystem",
            Self::Caller => "Check the command against the subsystem's tier",
            Self::Conflict => "Edit the manifest or the system so both sides agree, or use --force",
            Self::Other => "Check the error details for more information",
        }
    }
}

/// Errors that can occur during reconciliation.
#[derive(Debug, Error)]
pub enum Error {
    /// A subsystem with this id is already registered
    #[error("duplicate subsystem: {id}")]
    DuplicateSubsystem { id: SubsystemId },

    /// No subsystem with this id is registered
    #[error("unknown subsystem: {id}")]
    NotFound { id: SubsystemId },

    /// The item is not declared in the subsystem's manifest
    #[error("{subsystem}: item not declared: {item}")]
    ItemNotFound { subsystem: SubsystemId, item: ItemId },

    /// Operation is not legal for the subsystem's tier
    #[error("{operation} is not supported for {tier} subsystem {subsystem}")]
    UnsupportedForTier {
        subsystem: SubsystemId,
        tier: SubsystemTier,
        operation: Operation,
    },

    /// The backend tool is missing or cannot be used
    #[error("{backend} unavailable: {message}")]
    AdapterUnavailable { backend: String, message: String },

    /// A backend call did not finish in time
    #[error("{backend} timed out after {}s during {call}", .timeout.as_secs())]
    AdapterTimeout {
        backend: String,
        call: &'static str,
        timeout: Duration,
    },

    /// A backend command ran and failed
    #[error("{backend} failed: {message}")]
    AdapterFailed {
        backend: String,
        message: String,
        stderr: String,
        category: ErrorCategory,
    },

    /// The manifest could not be parsed, as a whole or for one subsystem
    #[error("manifest corrupt{}: {message}", .subsystem.as_ref().map(|s| format!(" ({s})")).unwrap_or_default())]
    ManifestCorrupt {
        subsystem: Option<SubsystemId>,
        message: String,
    },

    /// A subsystem's baseline could not be parsed or does not fit the registry
    #[error("baseline corrupt ({subsystem}): {message}")]
    BaselineCorrupt {
        subsystem: SubsystemId,
        message: String,
    },

    /// Item definition is unusable (bad id, missing source metadata)
    #[error("invalid item: {message}")]
    InvalidItem { message: String },

    /// Re-baselining would bless one side of unresolved conflicts
    #[error("{subsystem} has {count} unresolved conflict(s)")]
    ConflictsPresent { subsystem: SubsystemId, count: usize },

    /// The pass was cancelled before this subsystem started
    #[error("cancelled")]
    Cancelled,

    /// Aggregate failure of a pass
    #[error("{operation} failed for {failed} of {total} subsystem(s)")]
    PassFailed {
        operation: Operation,
        failed: usize,
        total: usize,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Get the error category for retry logic and reporting.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::DuplicateSubsystem { .. } | Error::UnsupportedForTier { .. } => {
                ErrorCategory::Caller
            }
            Error::InvalidItem { .. } => ErrorCategory::Caller,
            Error::NotFound { .. } | Error::ItemNotFound { .. } => ErrorCategory::NotFound,
            Error::AdapterUnavailable { .. } => ErrorCategory::Unavailable,
            Error::AdapterTimeout { .. } => ErrorCategory::Timeout,
            Error::AdapterFailed { category, .. } => *category,
            Error::ManifestCorrupt { .. } | Error::BaselineCorrupt { .. } => {
                ErrorCategory::Corrupt
            }
            Error::ConflictsPresent { .. } => ErrorCategory::Conflict,
            _ => ErrorCategory::Other,
        }
    }

    /// Whether this error is typically transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether the backend itself failed, as opposed to the caller or the stores.
    pub fn is_adapter_failure(&self) -> bool {
        matches!(
            self,
            Error::AdapterUnavailable { .. }
                | Error::AdapterTimeout { .. }
                | Error::AdapterFailed { .. }
        )
    }

    pub fn unavailable(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Error::AdapterUnavailable {
            backend: backend.into(),
            message: message.into(),
        }
    }

    pub fn invalid_item(message: impl Into<String>) -> Self {
        Error::InvalidItem {
            message: message.into(),
        }
    }

    /// Create an error from a failed backend command.
    ///
    /// Analyzes stderr to categorize the error appropriately.
    pub fn from_command_output(backend: &str, stderr: &str, item: Option<&str>) -> Self {
        let stderr_lower = stderr.to_lowercase();
        let message = format!(
            "command failed{}",
            item.map(|i| format!(" for {i}")).unwrap_or_default()
        );

        let category = if stderr_lower.contains("could not resolve")
            || stderr_lower.contains("connection refused")
            || stderr_lower.contains("timed out")
            || stderr_lower.contains("network")
            || stderr_lower.contains("ssl")
            || stderr_lower.contains("certificate")
            || stderr_lower.contains("failed to download")
            || stderr_lower.contains("temporary failure")
        {
            ErrorCategory::Network
        } else if stderr_lower.contains("not found")
            || stderr_lower.contains("no such")
            || stderr_lower.contains("nothing matches")
            || stderr_lower.contains("no available formula")
            || stderr_lower.contains("doesn't exist")
            || stderr_lower.contains("does not exist")
        {
            ErrorCategory::NotFound
        } else if stderr_lower.contains("permission denied")
            || stderr_lower.contains("operation not permitted")
            || stderr_lower.contains("not authorized")
            || stderr_lower.contains("authentication is required")
        {
            ErrorCategory::Permission
        } else if stderr_lower.contains("conflict") {
            ErrorCategory::Conflict
        } else {
            ErrorCategory::Other
        };

        Error::AdapterFailed {
            backend: backend.to_string(),
            message,
            stderr: stderr.trim().to_string(),
            category,
        }
    }
}

/// Result type for reconciliation operations.
pub type Result<T> = std::result::Result<T, Error>;
