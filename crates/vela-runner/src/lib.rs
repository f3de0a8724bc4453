//! Vela component runner core.
//!
//! Turns a resolved component URL plus a content bundle into a running
//! execution context: bundle access, program-image extraction, the launch
//! lifecycle, and the controller that reports the application's exit code.

pub mod bundle;
pub mod controller;
pub mod error;
pub mod extract;
pub mod runner;

pub use bundle::{page_size, write_bundle, ContentBundle};
pub use controller::{controller_channel, ExitReceiver};
pub use error::RunnerError;
pub use runner::{ApplicationRunner, LaunchRequest};
