//! Statement interpretation against a context and its loop.
//!
//! Functions run to completion on the context's thread. `schedule` and
//! `defer` hand work back to the loop, so everything here takes the
//! context as `Rc<RefCell<..>>` and borrows it only for the duration of a
//! single step.

use std::cell::RefCell;
use std::rc::Rc;

use crate::context::Context;
use crate::error::VmError;
use crate::program::Stmt;
use crate::task_loop::LoopHandle;

/// Invoke the program's entry point.
///
/// Transitions the context to `Running`, executes `main`, and records the
/// returned exit code. An error return means the entry point reported
/// failure and the caller should stop the loop after the current task.
pub fn invoke_entry(ctx: &Rc<RefCell<Context>>, handle: &LoopHandle) -> Result<(), VmError> {
    ctx.borrow_mut().begin_running()?;
    match run_function(ctx, "main", handle) {
        Ok(code) => {
            if let Some(code) = code {
                ctx.borrow_mut().set_exit_code(code);
            }
            Ok(())
        }
        Err(err) => {
            ctx.borrow_mut().note_failure();
            Err(err)
        }
    }
}

/// Execute one function. Returns the `return` value if the body hit one.
pub fn run_function(
    ctx: &Rc<RefCell<Context>>,
    name: &str,
    handle: &LoopHandle,
) -> Result<Option<i32>, VmError> {
    let body = {
        let context = ctx.borrow();
        let Some(function) = context.program().function(name) else {
            return Err(VmError::UnknownFunction(name.to_string()));
        };
        function.body.clone()
    };

    for stmt in body {
        match stmt {
            Stmt::Print(text) => {
                println!("{text}");
                ctx.borrow_mut().record_print(text);
            }
            Stmt::Call(callee) => {
                run_function(ctx, &callee, handle)?;
            }
            Stmt::Schedule(callee) => {
                let ctx = Rc::clone(ctx);
                handle.post_task(move |h| run_scheduled(&ctx, &callee, h));
            }
            Stmt::Defer(callee) => {
                let ctx = Rc::clone(ctx);
                handle.post_microtask(move |h| run_scheduled(&ctx, &callee, h));
            }
            Stmt::Fail(reason) => return Err(VmError::Failure(reason)),
            Stmt::Return(code) => return Ok(Some(code)),
        }
    }
    Ok(None)
}

/// A task or microtask body. A failure here is terminal for the context:
/// the loop is told to stop after the current task.
fn run_scheduled(ctx: &Rc<RefCell<Context>>, name: &str, handle: &LoopHandle) {
    if let Err(err) = run_function(ctx, name, handle) {
        eprintln!("vela: scheduled function '{name}' failed: {err}");
        ctx.borrow_mut().note_failure();
        handle.post_quit();
    }
}
