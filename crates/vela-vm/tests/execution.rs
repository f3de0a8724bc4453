//! End-to-end execution through the context, loop, and interpreter.

use std::cell::RefCell;
use std::rc::Rc;

use once_cell::sync::Lazy;

use vela_vm::host::{self, HostParams};
use vela_vm::interp;
use vela_vm::program::{parse_library, Program};
use vela_vm::snapshot::{self, ImageMode, ProgramImage};
use vela_vm::{Context, ContextState, StartupInfo, TaskLoop, VmError};

static HOST_READY: Lazy<()> = Lazy::new(|| {
    host::initialize(HostParams {
        flags: host::flags_for_mode(ImageMode::Interpretable),
        ..HostParams::default()
    })
    .unwrap();
});

fn script_image(source: &str) -> Vec<u8> {
    let mut program = Program::new();
    program
        .add_library(parse_library("main.vela", source).unwrap())
        .unwrap();
    snapshot::serialize_program(&program)
}

/// Create a context for `source` and run its entry point to quiescence.
fn run_source(source: &str) -> Rc<RefCell<Context>> {
    Lazy::force(&HOST_READY);
    let image = script_image(source);
    let context = Context::create(
        &ProgramImage::Interpretable { script: &image },
        StartupInfo::default(),
        "test",
    )
    .unwrap();
    let context = Rc::new(RefCell::new(context));

    let mut task_loop = TaskLoop::new();
    let handle = task_loop.handle();
    {
        let context = Rc::clone(&context);
        handle.post_task(move |h| {
            if interp::invoke_entry(&context, h).is_err() {
                h.post_quit();
            }
        });
    }
    task_loop.run();
    context
}

#[test]
fn test_entry_return_code_is_reported() {
    let context = run_source("fn main {\nprint \"hi\";\nreturn 42;\n}\n");
    assert_eq!(context.borrow().exit_code(), 42);
    assert_eq!(context.borrow().printed(), ["hi"]);
}

#[test]
fn test_failure_reports_code_255() {
    let context = run_source("fn main {\nfail \"boom\";\n}\n");
    assert_eq!(context.borrow().exit_code(), 255);
}

#[test]
fn test_failure_masks_earlier_return_code() {
    let context = run_source(
        "fn main {\nschedule boom;\nreturn 0;\n}\nfn boom {\nfail \"late\";\n}\n",
    );
    assert_eq!(context.borrow().exit_code(), 255);
}

#[test]
fn test_scheduled_work_runs_after_entry() {
    let context = run_source(
        "fn main {\nschedule tick;\nprint \"entry\";\nreturn 0;\n}\nfn tick {\nprint \"tick\";\n}\n",
    );
    assert_eq!(context.borrow().printed(), ["entry", "tick"]);
}

#[test]
fn test_deferred_work_runs_before_next_task() {
    // `defer` from the entry runs in the microtask drain after the entry
    // task, ahead of any scheduled task.
    let context = run_source(
        "fn main {\nschedule late;\ndefer soon;\nreturn 0;\n}\nfn late {\nprint \"late\";\n}\nfn soon {\nprint \"soon\";\n}\n",
    );
    assert_eq!(context.borrow().printed(), ["soon", "late"]);
}

#[test]
fn test_unknown_function_call_fails() {
    let context = run_source("fn main {\ncall missing;\n}\n");
    assert_eq!(context.borrow().exit_code(), 255);
}

#[test]
fn test_context_state_machine() {
    Lazy::force(&HOST_READY);
    let image = script_image("fn main {\nreturn 0;\n}\n");
    let mut context = Context::create(
        &ProgramImage::Interpretable { script: &image },
        StartupInfo::default(),
        "states",
    )
    .unwrap();
    assert_eq!(context.state(), ContextState::Created);

    // Destroy before shutdown is a contract violation.
    let err = context.destroy().unwrap_err();
    assert!(matches!(err, VmError::Contract(_)));

    context.shutdown().unwrap();
    assert_eq!(context.state(), ContextState::ShuttingDown);

    // Shutdown is not re-entrant.
    let err = context.shutdown().unwrap_err();
    assert!(matches!(err, VmError::Contract(_)));

    context.destroy().unwrap();
    assert_eq!(context.state(), ContextState::Destroyed);
    let err = context.destroy().unwrap_err();
    assert!(matches!(err, VmError::Contract(_)));
}

#[test]
fn test_startup_environment_is_carried() {
    Lazy::force(&HOST_READY);
    let image = script_image("fn main {\nreturn 0;\n}\n");
    let context = Context::create(
        &ProgramImage::Interpretable { script: &image },
        StartupInfo {
            environment: vec![("MODE".to_string(), "test".to_string())],
            ..StartupInfo::default()
        },
        "env",
    )
    .unwrap();
    assert_eq!(
        context.environment(),
        [("MODE".to_string(), "test".to_string())]
    );
}
