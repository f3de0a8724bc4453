//! Process-wide runtime host.
//!
//! The host is initialized exactly once per process, before any context or
//! image operation, and finalized exactly once at process teardown. It is
//! an explicit singleton: state lives behind a lock and changes only
//! through [`initialize`] and [`finalize`], never through implicit static
//! initialization order.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::context::Context;
use crate::error::VmError;
use crate::snapshot::ImageMode;

/// Callback invoked by the runtime for a context that is shutting down or
/// being cleaned up.
pub type ContextCallback = Arc<dyn Fn(&mut Context) + Send + Sync>;

/// Parameters for [`initialize`].
#[derive(Default)]
pub struct HostParams {
    /// Fixed runtime flag list, selected by build mode.
    pub flags: Vec<String>,
    /// Invoked when a context begins shutting down: the embedder stops
    /// accepting new scheduled work on the context's loop and disposes its
    /// pending deferred-completion queue.
    pub on_shutdown: Option<ContextCallback>,
    /// Invoked when a destroyed context's native state must be released.
    pub on_cleanup: Option<ContextCallback>,
}

struct HostState {
    flags: Vec<String>,
    on_shutdown: Option<ContextCallback>,
    on_cleanup: Option<ContextCallback>,
}

enum HostSlot {
    Idle,
    Active(HostState),
    Finalized,
}

static HOST: Lazy<Mutex<HostSlot>> = Lazy::new(|| Mutex::new(HostSlot::Idle));

/// The fixed flag list the embedder passes for a given build mode.
pub fn flags_for_mode(mode: ImageMode) -> Vec<String> {
    match mode {
        ImageMode::Precompiled => vec!["--precompilation".to_string()],
        ImageMode::Interpretable => vec![
            "--enable-mirrors=false".to_string(),
            "--await-is-keyword".to_string(),
        ],
    }
}

/// Initialize the runtime host. Must be called exactly once per process.
pub fn initialize(params: HostParams) -> Result<(), VmError> {
    let mut slot = HOST.lock();
    match *slot {
        HostSlot::Idle => {
            *slot = HostSlot::Active(HostState {
                flags: params.flags,
                on_shutdown: params.on_shutdown,
                on_cleanup: params.on_cleanup,
            });
            Ok(())
        }
        HostSlot::Active(_) => Err(VmError::Contract(
            "host already initialized".to_string(),
        )),
        HostSlot::Finalized => Err(VmError::Contract(
            "host already finalized".to_string(),
        )),
    }
}

/// Finalize the runtime host. Must be called exactly once, at process
/// teardown, after every context has been destroyed.
pub fn finalize() -> Result<(), VmError> {
    let mut slot = HOST.lock();
    match *slot {
        HostSlot::Active(_) => {
            *slot = HostSlot::Finalized;
            Ok(())
        }
        HostSlot::Idle => Err(VmError::Contract(
            "host finalized before initialization".to_string(),
        )),
        HostSlot::Finalized => Err(VmError::Contract(
            "host already finalized".to_string(),
        )),
    }
}

pub fn is_initialized() -> bool {
    matches!(*HOST.lock(), HostSlot::Active(_))
}

/// The flag set the host was initialized with.
pub fn flags() -> Result<Vec<String>, VmError> {
    match &*HOST.lock() {
        HostSlot::Active(state) => Ok(state.flags.clone()),
        _ => Err(VmError::Contract("host not initialized".to_string())),
    }
}

// Callbacks are cloned out so the host lock is never held while one runs.

pub(crate) fn shutdown_callback() -> Option<ContextCallback> {
    match &*HOST.lock() {
        HostSlot::Active(state) => state.on_shutdown.clone(),
        _ => None,
    }
}

pub(crate) fn cleanup_callback() -> Option<ContextCallback> {
    match &*HOST.lock() {
        HostSlot::Active(state) => state.on_cleanup.clone(),
        _ => None,
    }
}

pub(crate) fn require_initialized(operation: &str) -> Result<(), VmError> {
    if is_initialized() {
        Ok(())
    } else {
        Err(VmError::Contract(format!(
            "{operation} requires an initialized host"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_for_mode() {
        assert_eq!(
            flags_for_mode(ImageMode::Precompiled),
            vec!["--precompilation"]
        );
        assert_eq!(
            flags_for_mode(ImageMode::Interpretable),
            vec!["--enable-mirrors=false", "--await-is-keyword"]
        );
    }
}
