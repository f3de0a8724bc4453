//! Single-threaded cooperative task loop.
//!
//! Each execution context runs under exactly one loop, bound to the thread
//! that created it. Tasks execute to completion in FIFO submission order
//! and the microtask queue is drained after every task. Suspension happens
//! only at the loop's own dequeue point; there is no preemption.
//!
//! Handles are `Rc`-based and deliberately `!Send`: nothing about a loop
//! may cross threads.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

type Task = Box<dyn FnOnce(&LoopHandle)>;

/// Clonable handle onto a loop, used to post work and request a stop.
#[derive(Clone)]
pub struct LoopHandle {
    tasks: Rc<RefCell<VecDeque<Task>>>,
    microtasks: Rc<RefCell<VecDeque<Task>>>,
    quit: Rc<Cell<bool>>,
}

impl LoopHandle {
    /// Post a task at the back of the FIFO queue.
    ///
    /// Once a quit has been requested the loop no longer accepts scheduled
    /// work; the task is dropped.
    pub fn post_task<F: FnOnce(&LoopHandle) + 'static>(&self, task: F) {
        if self.quit.get() {
            return;
        }
        self.tasks.borrow_mut().push_back(Box::new(task));
    }

    /// Post a microtask, drained after the current task completes.
    pub fn post_microtask<F: FnOnce(&LoopHandle) + 'static>(&self, task: F) {
        if self.quit.get() {
            return;
        }
        self.microtasks.borrow_mut().push_back(Box::new(task));
    }

    /// Ask the loop to stop immediately after the current task.
    pub fn post_quit(&self) {
        self.quit.set(true);
    }

    pub fn is_quitting(&self) -> bool {
        self.quit.get()
    }

    /// Dispose the pending deferred-completion queue without running it.
    /// Called from the context-shutdown path.
    pub fn clear_microtasks(&self) {
        self.microtasks.borrow_mut().clear();
    }
}

/// The loop itself. Created and run on one thread.
pub struct TaskLoop {
    handle: LoopHandle,
}

impl TaskLoop {
    pub fn new() -> Self {
        Self {
            handle: LoopHandle {
                tasks: Rc::new(RefCell::new(VecDeque::new())),
                microtasks: Rc::new(RefCell::new(VecDeque::new())),
                quit: Rc::new(Cell::new(false)),
            },
        }
    }

    pub fn handle(&self) -> LoopHandle {
        self.handle.clone()
    }

    /// Run tasks until the queue is empty or a quit is requested.
    pub fn run(&mut self) {
        loop {
            if self.handle.quit.get() {
                break;
            }
            let next = self.handle.tasks.borrow_mut().pop_front();
            let Some(task) = next else {
                break;
            };
            task(&self.handle);
            if self.handle.quit.get() {
                break;
            }
            self.drain_microtasks();
        }
    }

    fn drain_microtasks(&self) {
        loop {
            let next = self.handle.microtasks.borrow_mut().pop_front();
            let Some(task) = next else {
                break;
            };
            task(&self.handle);
            if self.handle.quit.get() {
                break;
            }
        }
    }
}

impl Default for TaskLoop {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, TaskLoop) {
        (Rc::new(RefCell::new(Vec::new())), TaskLoop::new())
    }

    #[test]
    fn test_tasks_run_in_fifo_order() {
        let (log, mut task_loop) = recorder();
        let handle = task_loop.handle();
        for name in ["a", "b", "c"] {
            let log = log.clone();
            handle.post_task(move |_| log.borrow_mut().push(name));
        }
        task_loop.run();
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_microtasks_drain_between_tasks() {
        let (log, mut task_loop) = recorder();
        let handle = task_loop.handle();
        {
            let log = log.clone();
            handle.post_task(move |h| {
                log.borrow_mut().push("task1");
                let inner = log.clone();
                h.post_microtask(move |_| inner.borrow_mut().push("micro1"));
            });
        }
        {
            let log = log.clone();
            handle.post_task(move |_| log.borrow_mut().push("task2"));
        }
        task_loop.run();
        assert_eq!(*log.borrow(), vec!["task1", "micro1", "task2"]);
    }

    #[test]
    fn test_quit_stops_after_current_task() {
        let (log, mut task_loop) = recorder();
        let handle = task_loop.handle();
        {
            let log = log.clone();
            handle.post_task(move |h| {
                log.borrow_mut().push("first");
                h.post_quit();
            });
        }
        {
            let log = log.clone();
            handle.post_task(move |_| log.borrow_mut().push("never"));
        }
        task_loop.run();
        assert_eq!(*log.borrow(), vec!["first"]);
    }

    #[test]
    fn test_posts_after_quit_are_dropped() {
        let (log, mut task_loop) = recorder();
        let handle = task_loop.handle();
        handle.post_quit();
        {
            let log = log.clone();
            handle.post_task(move |_| log.borrow_mut().push("dropped"));
        }
        task_loop.run();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_clear_microtasks_disposes_pending_work() {
        let (log, mut task_loop) = recorder();
        let handle = task_loop.handle();
        {
            let log = log.clone();
            handle.post_microtask(move |_| log.borrow_mut().push("dropped"));
        }
        handle.clear_microtasks();
        task_loop.run();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_tasks_posted_by_tasks_run_after_existing_queue() {
        let (log, mut task_loop) = recorder();
        let handle = task_loop.handle();
        {
            let log = log.clone();
            handle.post_task(move |h| {
                log.borrow_mut().push("a");
                let inner = log.clone();
                h.post_task(move |_| inner.borrow_mut().push("c"));
            });
        }
        {
            let log = log.clone();
            handle.post_task(move |_| log.borrow_mut().push("b"));
        }
        task_loop.run();
        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
    }
}
