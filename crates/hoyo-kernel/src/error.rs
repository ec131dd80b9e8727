//! Crate-level error types for `hoyo-kernel`.
//!
//! The taxonomy follows where an error can surface:
//!
//! - [`LoadError`](crate::plugin::LoadError): a package cannot become a
//!   loaded plugin. Isolated to that plugin.
//! - [`LifecycleError`](crate::plugin::LifecycleError): an enable/disable hook
//!   failed. Cleanup still runs.
//! - [`CallbackError`]: a scheduled task or listener failed. Logged with the
//!   owner, never propagated to the loop.
//! - [`PreconditionViolation`]: the caller broke an API contract. Fatal to
//!   that operation.
//!
//! [`HostError`] composes all of them (plus config and network errors) for
//! callers that want one type, and [`HostResult`] wraps it in an
//! [`error_stack::Report`] for startup paths that attach context.
//!
//! # Usage
//!
//! ```rust,ignore
//! use error_stack::ResultExt;
//! use hoyo_kernel::error::{HostError, HostResult};
//!
//! fn start(listener: &mut dyn NetworkListener) -> HostResult<()> {
//!     listener
//!         .start()
//!         .map_err(HostError::from)
//!         .map_err(error_stack::Report::new)
//!         .attach("starting network listener")?;
//!     Ok(())
//! }
//! ```

use crate::config::ConfigError;
use crate::network::NetworkError;
use crate::plugin::{LifecycleError, LoadError};
use crate::types::PluginId;
use thiserror::Error;

/// A scheduled task or event listener failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CallbackError {
    /// The callback returned an error.
    #[error("Callback owned by '{owner}' failed: {reason}")]
    Failed { owner: PluginId, reason: String },

    /// The callback panicked; the panic was contained.
    #[error("Callback owned by '{owner}' panicked: {message}")]
    Panicked { owner: PluginId, message: String },

    /// The listener was already running further up the stack.
    #[error("Listener owned by '{owner}' is already running (re-entrant dispatch)")]
    Reentrant { owner: PluginId },
}

impl CallbackError {
    pub fn owner(&self) -> &PluginId {
        match self {
            Self::Failed { owner, .. } | Self::Panicked { owner, .. } | Self::Reentrant { owner } => {
                owner
            }
        }
    }
}

/// The caller broke an API contract. Not caught-and-continued.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PreconditionViolation {
    #[error("Plugin '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("Plugin '{0}' is not loaded")]
    NotLoaded(String),

    #[error("Plugin '{0}' failed to load and can never be enabled")]
    PluginFailed(String),

    #[error("Repeating task period must be at least one tick")]
    ZeroPeriod,
}

/// Crate-level error type.
///
/// Wraps each sub-module's typed error via `#[from]` so that the `?`
/// operator converts them automatically.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HostError {
    #[error("Load error: {0}")]
    Load(#[from] LoadError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Callback error: {0}")]
    Callback(#[from] CallbackError),

    #[error("Precondition violated: {0}")]
    Precondition(#[from] PreconditionViolation),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(String),
}

/// Convenience result alias using [`error_stack::Report`].
pub type HostResult<T> = Result<T, error_stack::Report<HostError>>;

#[cfg(test)]
mod tests {
    use super::*;
    use error_stack::{Report, ResultExt};

    #[test]
    fn load_error_converts_via_from() {
        let err: HostError = LoadError::DuplicatePlugin("greeter".into()).into();
        assert!(matches!(err, HostError::Load(_)));
        assert!(err.to_string().contains("greeter"));
    }

    #[test]
    fn precondition_converts_via_from() {
        let err: HostError = PreconditionViolation::ZeroPeriod.into();
        assert!(matches!(err, HostError::Precondition(PreconditionViolation::ZeroPeriod)));
    }

    #[test]
    fn network_error_converts_via_from() {
        let err: HostError = NetworkError::StartFailed("port 80 in use".into()).into();
        assert!(matches!(err, HostError::Network(_)));
        assert!(err.to_string().contains("port 80 in use"));
    }

    #[test]
    fn callback_error_reports_owner() {
        let err = CallbackError::Panicked {
            owner: PluginId::new("greeter"),
            message: "boom".into(),
        };
        assert_eq!(err.owner().as_str(), "greeter");
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn report_carries_context() {
        let result: HostResult<()> =
            Err(Report::new(HostError::Internal("root cause".into()))).attach("while starting host");

        let report = result.unwrap_err();
        let display = format!("{report:?}");

        assert!(display.contains("root cause"));
        assert!(display.contains("while starting host"));
    }
}
