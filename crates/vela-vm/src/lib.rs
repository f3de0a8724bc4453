//! Vela runtime core.
//!
//! This crate is the managed-execution core shared by the runner and the
//! offline snapshotter: the process-wide host, the program model and its
//! image formats, execution contexts with their cooperative task loops,
//! and source loading with offline precompilation.
//!
//! The `aot` cargo feature selects the build mode: with it, images are
//! precompiled modules; without it, they are interpretable script images.
//! The mode is a whole-build choice — it is never inferred from data.

pub mod context;
pub mod error;
pub mod host;
pub mod interp;
pub mod loader;
pub mod module;
pub mod program;
pub mod resolver;
pub mod snapshot;
pub mod task_loop;

pub use context::{Context, ContextState, RawHandle, StartupInfo};
pub use error::VmError;
pub use host::HostParams;
pub use snapshot::{ImageMode, ProgramImage};
pub use task_loop::{LoopHandle, TaskLoop};

#[cfg(test)]
pub(crate) mod test_support {
    use once_cell::sync::Lazy;

    use crate::host::{self, HostParams};
    use crate::snapshot::ImageMode;

    // The host is process-global and the test harness runs tests in
    // parallel, so every test that needs a host goes through this.
    static HOST_READY: Lazy<()> = Lazy::new(|| {
        host::initialize(HostParams {
            flags: host::flags_for_mode(ImageMode::for_build()),
            ..HostParams::default()
        })
        .unwrap();
    });

    pub fn ensure_host() {
        Lazy::force(&HOST_READY);
    }
}
