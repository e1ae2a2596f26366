//! A single-execution guard for teardown actions.
//!
//! The exercise session hands its remount action to a [`Cleanup`] and then
//! shares the guard between the normal completion path and the interrupt
//! listener. Whichever reaches [`Cleanup::run`] first performs the action; any
//! later caller blocks until that first run has finished and then returns
//! without doing anything.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Once, PoisonError};

type Action = Box<dyn FnOnce() + Send>;

/// Where a [`Cleanup`] is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CleanupState {
    NotYetRun,
    Running,
    Done,
}

pub struct Cleanup {
    once: Once,
    running: AtomicBool,
    action: Mutex<Option<Action>>,
}

impl Cleanup {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            once: Once::new(),
            running: AtomicBool::new(false),
            action: Mutex::new(Some(Box::new(action))),
        }
    }

    /// Runs the action unless it has already been run.
    ///
    /// Returns `true` for the one caller that actually executed the action.
    /// Concurrent callers wait for the executing caller to finish.
    pub fn run(&self) -> bool {
        let mut executed = false;
        // `call_once_force` so a panicking action does not poison the guard
        // for the other path; the action itself is already gone by then.
        self.once.call_once_force(|_| {
            self.running.store(true, Ordering::SeqCst);
            let action = self
                .action
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(action) = action {
                executed = true;
                action();
            }
        });
        executed
    }

    pub fn state(&self) -> CleanupState {
        if self.once.is_completed() {
            CleanupState::Done
        } else if self.running.load(Ordering::SeqCst) {
            CleanupState::Running
        } else {
            CleanupState::NotYetRun
        }
    }
}

impl std::fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cleanup")
            .field("state", &self.state())
            .finish()
    }
}
