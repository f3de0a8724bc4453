//! Offline Vela image builder.
//!
//! Loads a program from source through a packages map and writes the
//! image the runner consumes: a script image by default, a precompiled
//! app module under the `aot` feature, or the shared runtime image alone.

pub mod builder;
pub mod cli;
pub mod depfile;
