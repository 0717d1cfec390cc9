//! Error types for call-core operations
//!
//! Errors raised by this crate fall into three groups:
//!
//! - **Transition no-ops** - setting a state to its current value or
//!   registering a listener twice. These are not errors at all; the call
//!   simply returns without doing anything.
//! - **Operation failures** - hold, unhold or hangup requests rejected by a
//!   protocol provider's telephony capability. These are recoverable: the
//!   admission policy logs them and moves on to the next peer or call.
//! - **Listener faults** - a listener callback returning
//!   [`ListenerError::Failed`] is logged and the fan-out continues.
//!   [`ListenerError::Fatal`] aborts the fan-out in progress and surfaces
//!   to the caller as [`CallCoreError::ListenerAborted`].
//!
//! # Handling Pattern
//!
//! ```rust
//! use rvoip_call_core::CallCoreError;
//!
//! let err = CallCoreError::operation_failed("put_on_hold", "re-INVITE timed out");
//! assert!(err.is_recoverable());
//! assert_eq!(err.category(), "telephony");
//! ```

use thiserror::Error;

/// Result type alias for call-core operations
pub type CallCoreResult<T> = Result<T, CallCoreError>;

/// Result type returned by every listener callback
pub type ListenerResult = Result<(), ListenerError>;

/// Errors produced by call-core operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallCoreError {
    /// A telephony operation (hold, unhold, hangup) failed
    #[error("Operation failed: {operation} - {reason}")]
    OperationFailed { operation: String, reason: String },

    /// The protocol provider exposes no telephony capability
    #[error("Telephony operations unavailable for account {account}")]
    TelephonyUnavailable { account: String },

    /// A listener reported a fatal fault and the fan-out was aborted
    #[error("Listener aborted dispatch of {event}: {reason}")]
    ListenerAborted { event: String, reason: String },

    /// A transient display state was requested with no timer runtime
    #[error("Timer unavailable: {reason}")]
    TimerUnavailable { reason: String },

    /// Configuration value out of range
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// Configuration text could not be parsed
    #[error("Configuration parse error: {reason}")]
    ConfigParse { reason: String },
}

impl CallCoreError {
    /// Create an operation failed error
    pub fn operation_failed(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::OperationFailed {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a telephony unavailable error
    pub fn telephony_unavailable(account: impl Into<String>) -> Self {
        Self::TelephonyUnavailable {
            account: account.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Check if the caller may log this error and carry on
    pub fn is_recoverable(&self) -> bool {
        match self {
            CallCoreError::OperationFailed { .. }
            | CallCoreError::TelephonyUnavailable { .. }
            | CallCoreError::TimerUnavailable { .. } => true,

            CallCoreError::ListenerAborted { .. }
            | CallCoreError::InvalidConfiguration { .. }
            | CallCoreError::ConfigParse { .. } => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            CallCoreError::OperationFailed { .. } | CallCoreError::TelephonyUnavailable { .. } => {
                "telephony"
            }
            CallCoreError::ListenerAborted { .. } => "listener",
            CallCoreError::TimerUnavailable { .. } => "timer",
            CallCoreError::InvalidConfiguration { .. } | CallCoreError::ConfigParse { .. } => {
                "configuration"
            }
        }
    }
}

/// Fault reported by a listener callback
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenerError {
    /// The listener could not handle the event; delivery to the remaining
    /// listeners continues
    #[error("listener failed: {0}")]
    Failed(String),

    /// Unrecoverable condition; the current fan-out stops here
    #[error("fatal listener fault: {0}")]
    Fatal(String),
}

impl ListenerError {
    /// Create a recoverable listener failure
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    /// Create a fatal listener fault
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal(reason.into())
    }
}

/// Relaying listeners re-dispatch events; an aborted inner fan-out stays fatal
impl From<CallCoreError> for ListenerError {
    fn from(err: CallCoreError) -> Self {
        match err {
            CallCoreError::ListenerAborted { reason, .. } => ListenerError::Fatal(reason),
            other => ListenerError::Failed(other.to_string()),
        }
    }
}
