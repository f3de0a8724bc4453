//! Application controllers.
//!
//! Each launch carries a controller: the runner's side delivers at most
//! one exit code, ever, and a launch abandoned before its entry point ran
//! delivers nothing. The caller's side is a plain receiver it can wait on.

use std::sync::mpsc;
use std::time::Duration;

/// The controller end moved into a launch request.
pub struct ControllerRequest {
    sender: mpsc::Sender<i32>,
}

/// The caller-held end that observes the application's exit code.
pub struct ExitReceiver {
    receiver: mpsc::Receiver<i32>,
}

impl ExitReceiver {
    /// Block until the exit code arrives. `None` if the launch was
    /// abandoned without one.
    pub fn wait(&self) -> Option<i32> {
        self.receiver.recv().ok()
    }

    /// Wait with a deadline. `None` on timeout or abandonment.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<i32> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

/// Create the two ends of a launch controller.
pub fn controller_channel() -> (ControllerRequest, ExitReceiver) {
    let (sender, receiver) = mpsc::channel();
    (ControllerRequest { sender }, ExitReceiver { receiver })
}

/// Runner-side controller state.
pub struct ApplicationController {
    sender: Option<mpsc::Sender<i32>>,
}

impl ApplicationController {
    pub fn new(request: ControllerRequest) -> Self {
        Self {
            sender: Some(request.sender),
        }
    }

    /// Deliver the exit code. The sender is consumed on first use, so a
    /// second call is a no-op.
    pub fn send_return_code(&mut self, code: i32) {
        if let Some(sender) = self.sender.take() {
            // The caller may have dropped its receiver; that is fine.
            let _ = sender.send(code);
        }
    }

    pub fn has_sent(&self) -> bool {
        self.sender.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_is_delivered_once() {
        let (request, receiver) = controller_channel();
        let mut controller = ApplicationController::new(request);
        assert!(!controller.has_sent());

        controller.send_return_code(7);
        assert!(controller.has_sent());
        assert_eq!(receiver.wait_timeout(Duration::from_secs(1)), Some(7));

        // Second delivery is dropped.
        controller.send_return_code(8);
        assert_eq!(receiver.wait_timeout(Duration::from_millis(50)), None);
    }

    #[test]
    fn test_abandoned_launch_delivers_nothing() {
        let (request, receiver) = controller_channel();
        drop(request);
        assert_eq!(receiver.wait(), None);
    }

    #[test]
    fn test_delivery_survives_dropped_receiver() {
        let (request, receiver) = controller_channel();
        let mut controller = ApplicationController::new(request);
        drop(receiver);
        controller.send_return_code(1);
        assert!(controller.has_sent());
    }
}
