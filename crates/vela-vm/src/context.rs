//! Execution contexts.
//!
//! A context is an independently scheduled unit of managed execution: it
//! owns the program decoded from one image, is bound to exactly one OS
//! thread for its entire life, and walks a fixed lifecycle:
//!
//! ```text
//! Created → Running → ShuttingDown → Destroyed
//! ```
//!
//! There is no transition out of `Destroyed`, and no operation is legal
//! from another thread.

use std::any::Any;
use std::thread::{self, ThreadId};

use crate::error::VmError;
use crate::host;
use crate::program::Program;
use crate::snapshot::{self, ProgramImage};

/// Lifecycle state of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Created,
    Running,
    ShuttingDown,
    Destroyed,
}

/// An opaque platform handle forwarded to the managed program untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHandle(pub u64);

/// Per-launch startup information. Opaque to the runtime core; the
/// environment and handles are made available to builtin libraries.
#[derive(Debug, Default)]
pub struct StartupInfo {
    pub environment: Vec<(String, String)>,
    pub namespace: Option<RawHandle>,
    pub outgoing_services: Option<RawHandle>,
}

/// One execution context.
pub struct Context {
    label: String,
    program: Program,
    startup: StartupInfo,
    state: ContextState,
    owner: ThreadId,
    exit_code: i32,
    failed: bool,
    native: Option<Box<dyn Any>>,
    printed: Vec<String>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("label", &self.label)
            .field("state", &self.state)
            .field("owner", &self.owner)
            .field("exit_code", &self.exit_code)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Create a context from a program image.
    ///
    /// Must be called on the thread that will run the context; the host
    /// must already be initialized.
    pub fn create(
        image: &ProgramImage<'_>,
        startup: StartupInfo,
        label: &str,
    ) -> Result<Self, VmError> {
        host::require_initialized("context creation")?;
        let program = match image {
            ProgramImage::Interpretable { script } => snapshot::deserialize_program(script)?,
            ProgramImage::Precompiled { data, instructions } => {
                snapshot::deserialize_app_parts(data, instructions)?
            }
        };
        Ok(Self {
            label: label.to_string(),
            program,
            startup,
            state: ContextState::Created,
            owner: thread::current().id(),
            exit_code: 0,
            failed: false,
            native: None,
            printed: Vec::new(),
        })
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn environment(&self) -> &[(String, String)] {
        &self.startup.environment
    }

    pub fn startup(&self) -> &StartupInfo {
        &self.startup
    }

    /// Lines produced by `print` statements, in execution order.
    pub fn printed(&self) -> &[String] {
        &self.printed
    }

    /// The exit code to report: the entry point's `return` value, or 255
    /// if the program signalled failure.
    pub fn exit_code(&self) -> i32 {
        if self.failed {
            255
        } else {
            self.exit_code
        }
    }

    /// Attach embedder state (the runner stores its loop handle here).
    pub fn set_native_state(&mut self, state: Box<dyn Any>) {
        self.native = Some(state);
    }

    pub fn native_state_ref<T: 'static>(&self) -> Option<&T> {
        self.native.as_ref()?.downcast_ref()
    }

    pub fn take_native_state(&mut self) -> Option<Box<dyn Any>> {
        self.native.take()
    }

    /// Begin shutting down: the runtime invokes the host's shutdown
    /// callback (which stops the loop accepting work and disposes the
    /// deferred queue), then moves to `ShuttingDown`.
    pub fn shutdown(&mut self) -> Result<(), VmError> {
        self.check_owner("shutdown")?;
        match self.state {
            ContextState::Created | ContextState::Running => {
                if let Some(callback) = host::shutdown_callback() {
                    callback(self);
                }
                self.state = ContextState::ShuttingDown;
                Ok(())
            }
            other => Err(VmError::Contract(format!(
                "shutdown from state {other:?}"
            ))),
        }
    }

    /// Destroy the context: the runtime invokes the host's cleanup
    /// callback to release native state, then moves to `Destroyed`.
    pub fn destroy(&mut self) -> Result<(), VmError> {
        self.check_owner("destroy")?;
        match self.state {
            ContextState::ShuttingDown => {
                if let Some(callback) = host::cleanup_callback() {
                    callback(self);
                }
                self.state = ContextState::Destroyed;
                Ok(())
            }
            other => Err(VmError::Contract(format!("destroy from state {other:?}"))),
        }
    }

    pub(crate) fn begin_running(&mut self) -> Result<(), VmError> {
        self.check_owner("entry invocation")?;
        match self.state {
            ContextState::Created => {
                self.state = ContextState::Running;
                Ok(())
            }
            other => Err(VmError::Contract(format!(
                "entry invocation from state {other:?}"
            ))),
        }
    }

    pub(crate) fn set_exit_code(&mut self, code: i32) {
        self.exit_code = code;
    }

    pub(crate) fn note_failure(&mut self) {
        self.failed = true;
    }

    pub(crate) fn record_print(&mut self, line: String) {
        self.printed.push(line);
    }

    fn check_owner(&self, operation: &str) -> Result<(), VmError> {
        if thread::current().id() == self.owner {
            Ok(())
        } else {
            Err(VmError::Contract(format!(
                "{operation} on a thread that does not own the context"
            )))
        }
    }
}
