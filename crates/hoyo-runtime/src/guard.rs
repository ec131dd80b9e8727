//! Invocation boundary for plugin code.
//!
//! Every call into a plugin (hook, task, listener) goes through [`guarded`],
//! which turns both an error result and a panic into a [`CallbackError`].

use hoyo_kernel::{CallbackError, PluginId, PluginResult};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Run `f` on behalf of `owner`, containing errors and panics.
pub(crate) fn guarded<F>(owner: &PluginId, f: F) -> Result<(), CallbackError>
where
    F: FnOnce() -> PluginResult<()>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(CallbackError::Failed {
            owner: owner.clone(),
            reason: err.to_string(),
        }),
        Err(payload) => Err(CallbackError::Panicked {
            owner: owner.clone(),
            message: panic_message(payload.as_ref()),
        }),
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoyo_kernel::PluginError;

    #[test]
    fn ok_passes_through() {
        assert!(guarded(&PluginId::new("p"), || Ok(())).is_ok());
    }

    #[test]
    fn error_is_attributed_to_owner() {
        let err = guarded(&PluginId::new("p"), || {
            Err(PluginError::ExecutionFailed("nope".into()))
        })
        .unwrap_err();
        assert!(matches!(err, CallbackError::Failed { ref reason, .. } if reason.contains("nope")));
        assert_eq!(err.owner().as_str(), "p");
    }

    #[test]
    fn panic_is_contained() {
        let err = guarded(&PluginId::new("p"), || panic!("kaboom {}", 7)).unwrap_err();
        assert!(matches!(err, CallbackError::Panicked { ref message, .. } if message == "kaboom 7"));
    }
}
