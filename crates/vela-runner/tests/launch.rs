//! Launch lifecycle, interpretable mode.
//!
//! The runner boots the process-global host, so one runner is shared by
//! every test in this binary and never dropped.

#![cfg(not(feature = "aot"))]

use std::time::Duration;

use once_cell::sync::Lazy;

use vela_runner::bundle::{bundle_bytes, write_bundle, ContentBundle};
use vela_runner::controller::controller_channel;
use vela_runner::runner::{ApplicationRunner, LaunchRequest};
use vela_vm::program::{parse_library, Program};
use vela_vm::snapshot::{serialize_program, ImageMode};
use vela_vm::StartupInfo;

static RUNNER: Lazy<ApplicationRunner> =
    Lazy::new(|| ApplicationRunner::new(ImageMode::Interpretable));

const TAG: &str = "#!vela runner\n";
const WAIT: Duration = Duration::from_secs(5);

fn script_bundle(source: &str) -> ContentBundle {
    let mut program = Program::new();
    program
        .add_library(parse_library("main.vela", source).unwrap())
        .unwrap();
    let image = serialize_program(&program);
    ContentBundle::from_bytes(bundle_bytes(TAG, &image).unwrap())
}

fn launch(bundle: ContentBundle, url: &str) -> vela_runner::ExitReceiver {
    let (controller, receiver) = controller_channel();
    RUNNER.start_application(LaunchRequest {
        bundle,
        resolved_url: url.to_string(),
        startup: StartupInfo::default(),
        controller,
    });
    receiver
}

#[test]
fn test_launch_reports_entry_return_code() {
    let bundle = script_bundle("fn main {\nprint \"hello\";\nreturn 42;\n}\n");
    let receiver = launch(bundle, "file:///pkg/data/hello_app");
    assert_eq!(receiver.wait_timeout(WAIT), Some(42));
}

#[test]
fn test_failed_entry_reports_255() {
    let bundle = script_bundle("fn main {\nfail \"boom\";\n}\n");
    let receiver = launch(bundle, "file:///pkg/data/failing_app");
    assert_eq!(receiver.wait_timeout(WAIT), Some(255));
}

#[test]
fn test_scheduled_work_completes_before_exit_code() {
    let bundle = script_bundle(
        "fn main {\nschedule tick;\nreturn 3;\n}\nfn tick {\ndefer flush;\n}\nfn flush {\nprint \"done\";\n}\n",
    );
    let receiver = launch(bundle, "file:///pkg/data/scheduling_app");
    assert_eq!(receiver.wait_timeout(WAIT), Some(3));
}

#[test]
fn test_undersized_bundle_is_abandoned_silently() {
    let bundle = ContentBundle::from_bytes(vec![0u8; 16]);
    let receiver = launch(bundle, "file:///pkg/data/tiny_app");
    // No exit code, ever: the channel closes without a value.
    assert_eq!(receiver.wait(), None);
}

#[test]
fn test_corrupt_image_is_abandoned_silently() {
    let bundle = ContentBundle::from_bytes(bundle_bytes(TAG, b"not an image").unwrap());
    let receiver = launch(bundle, "file:///pkg/data/corrupt_app");
    assert_eq!(receiver.wait(), None);
}

#[test]
fn test_concurrent_launches_are_independent() {
    let first = launch(
        script_bundle("fn main {\nreturn 11;\n}\n"),
        "file:///pkg/data/first_app",
    );
    let second = launch(
        script_bundle("fn main {\nreturn 22;\n}\n"),
        "file:///pkg/data/second_app",
    );
    let third = launch(
        ContentBundle::from_bytes(vec![0u8; 8]),
        "file:///pkg/data/broken_app",
    );
    assert_eq!(first.wait_timeout(WAIT), Some(11));
    assert_eq!(second.wait_timeout(WAIT), Some(22));
    assert_eq!(third.wait(), None);
}

#[test]
fn test_launch_from_bundle_file() {
    let mut program = Program::new();
    program
        .add_library(parse_library("main.vela", "fn main {\nreturn 9;\n}\n").unwrap())
        .unwrap();
    let image = serialize_program(&program);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.bundle");
    write_bundle(&path, TAG, &image).unwrap();

    let bundle = ContentBundle::open(&path).unwrap();
    let receiver = launch(bundle, "file:///pkg/data/mapped_app");
    assert_eq!(receiver.wait_timeout(WAIT), Some(9));
}
