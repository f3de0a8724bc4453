//! The application runner.
//!
//! One runner per process: constructing it boots the runtime host with the
//! fixed flag list for the build mode and registers the context shutdown
//! and cleanup callbacks. Each launch gets its own detached OS thread that
//! owns the context, its task loop, and the controller for the duration of
//! the launch; nothing is shared between launches and nothing joins the
//! thread.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::thread;

use vela_vm::host::{self, HostParams};
use vela_vm::snapshot::ImageMode;
use vela_vm::{interp, Context, LoopHandle, StartupInfo, TaskLoop, VmError};

use crate::bundle::ContentBundle;
use crate::controller::{ApplicationController, ControllerRequest};
use crate::extract::extract_image;

/// Everything one launch needs. Moves wholesale into the launch thread.
pub struct LaunchRequest {
    pub bundle: ContentBundle,
    pub resolved_url: String,
    pub startup: StartupInfo,
    pub controller: ControllerRequest,
}

/// The process-wide application runner.
pub struct ApplicationRunner {
    mode: ImageMode,
}

impl ApplicationRunner {
    /// Boot the runtime host and build the runner.
    ///
    /// A host that fails to initialize (or was already initialized) is an
    /// embedding-contract violation; there is nothing to recover, so this
    /// reports and aborts.
    pub fn new(mode: ImageMode) -> Self {
        let result = host::initialize(HostParams {
            flags: host::flags_for_mode(mode),
            on_shutdown: Some(Arc::new(|context: &mut Context| {
                // Stop the context's loop accepting scheduled work and
                // dispose the pending deferred queue without running it.
                if let Some(handle) = context.native_state_ref::<LoopHandle>() {
                    handle.post_quit();
                    handle.clear_microtasks();
                }
            })),
            on_cleanup: Some(Arc::new(|context: &mut Context| {
                context.take_native_state();
            })),
        });
        if let Err(err) = result {
            fatal("initializing the runtime host", &err);
        }
        Self { mode }
    }

    pub fn mode(&self) -> ImageMode {
        self.mode
    }

    /// Launch an application on its own thread. The caller keeps only the
    /// exit receiver; the thread is never joined.
    pub fn start_application(&self, request: LaunchRequest) {
        let mode = self.mode;
        let label = label_from_url(&request.resolved_url);
        let spawned = thread::Builder::new()
            .name(label.clone())
            .spawn(move || run_application(mode, label, request));
        if let Err(err) = spawned {
            eprintln!("vela_runner: could not spawn launch thread: {err}");
        }
    }
}

impl Drop for ApplicationRunner {
    fn drop(&mut self) {
        if let Err(err) = host::finalize() {
            fatal("finalizing the runtime host", &err);
        }
    }
}

fn fatal(operation: &str, err: &VmError) -> ! {
    eprintln!("vela_runner: {operation} failed: {err}");
    std::process::abort()
}

/// The launch body, run on the launch's own thread.
///
/// Extraction and context-creation failures abandon the launch: the thread
/// exits, the controller is dropped unsent, and the caller is not
/// notified.
fn run_application(mode: ImageMode, label: String, request: LaunchRequest) {
    apply_process_label(&label);
    let mut bundle = request.bundle;
    bundle.set_label(&label);

    let image = match extract_image(&bundle, mode) {
        Ok(image) => image,
        Err(err) => {
            eprintln!("vela_runner: {label}: image extraction failed: {err}");
            return;
        }
    };

    let context = match Context::create(&image, request.startup, &label) {
        Ok(context) => context,
        Err(err) => {
            eprintln!("vela_runner: {label}: context creation failed: {err}");
            return;
        }
    };
    let context = Rc::new(RefCell::new(context));

    let mut task_loop = TaskLoop::new();
    let handle = task_loop.handle();
    context
        .borrow_mut()
        .set_native_state(Box::new(handle.clone()));

    {
        let context = Rc::clone(&context);
        handle.post_task(move |h| {
            if interp::invoke_entry(&context, h).is_err() {
                h.post_quit();
            }
        });
    }
    task_loop.run();

    let code = context.borrow().exit_code();
    let mut controller = ApplicationController::new(request.controller);
    controller.send_return_code(code);

    let mut context = context.borrow_mut();
    if let Err(err) = context.shutdown() {
        eprintln!("vela_runner: {label}: shutdown failed: {err}");
        return;
    }
    if let Err(err) = context.destroy() {
        eprintln!("vela_runner: {label}: destroy failed: {err}");
    }
}

/// Diagnostic label for a resolved component URL: `vela:` plus the final
/// path segment, or the whole URL when there is no usable segment.
pub fn label_from_url(url: &str) -> String {
    let name = match url.rfind('/') {
        Some(pos) if pos + 1 < url.len() => &url[pos + 1..],
        _ => url,
    };
    format!("vela:{name}")
}

/// Tag the hosting process with the launch label where the platform
/// allows it. The launch thread itself is named at spawn.
pub fn apply_process_label(label: &str) {
    #[cfg(target_os = "linux")]
    {
        // PR_SET_NAME takes at most 15 bytes plus the terminator.
        let mut name = label.as_bytes().to_vec();
        name.truncate(15);
        name.push(0);
        unsafe {
            libc::prctl(libc::PR_SET_NAME, name.as_ptr() as libc::c_ulong, 0, 0, 0);
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = label;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_from_url() {
        assert_eq!(
            label_from_url("file:///pkg/data/hello_app"),
            "vela:hello_app"
        );
        assert_eq!(label_from_url("hello_app"), "vela:hello_app");
        // A URL ending in '/' has no final segment; keep it whole.
        assert_eq!(
            label_from_url("file:///pkg/data/"),
            "vela:file:///pkg/data/"
        );
    }
}
