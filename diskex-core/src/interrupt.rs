//! Process-wide interrupt registration.
//!
//! SIGINT and SIGTERM are routed through a single `ctrlc` handler that is
//! installed once per process. A session arms the registration with its
//! cleanup handler for exactly as long as it runs; the returned [`Armed`]
//! guard disarms it again when dropped.
//!
//! Cancellation is not cooperative. When a signal arrives, the listener runs
//! the armed handler and then terminates the process through the exit hook,
//! without waiting for whatever blocking read the session is stuck in.
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// The process exit status used after an interrupt.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

type Handler = Arc<dyn Fn() + Send + Sync>;
type ExitHook = Box<dyn Fn(i32) + Send + Sync>;

struct Inner {
    armed: Mutex<Option<Handler>>,
    exit: ExitHook,
}

/// A handle to an interrupt registration.
///
/// Cloning is cheap; all clones share the same armed handler.
#[derive(Clone)]
pub struct Interrupts {
    inner: Arc<Inner>,
}

static PROCESS: Mutex<Option<Interrupts>> = Mutex::new(None);

impl Interrupts {
    /// Installs the process-wide SIGINT/SIGTERM listener.
    ///
    /// `exit` is called with [`INTERRUPTED_EXIT_CODE`] after the armed
    /// handler (if any) has run, and must not return in a real program;
    /// `std::process::exit` wrapped with any terminal restoration the
    /// front-end needs. Later calls return the already installed registration
    /// and ignore their `exit` argument.
    pub fn install(exit: impl Fn(i32) + Send + Sync + 'static) -> Result<Self, ctrlc::Error> {
        let mut process = PROCESS.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = process.as_ref() {
            return Ok(existing.clone());
        }

        let interrupts = Self::detached(exit);
        let listener = interrupts.clone();
        ctrlc::set_handler(move || listener.raise())?;
        debug!("interrupt listener installed");

        *process = Some(interrupts.clone());
        Ok(interrupts)
    }

    /// Creates a registration that is not connected to any signal.
    ///
    /// Interrupts are delivered by calling [`Interrupts::raise`] directly,
    /// which is how embedding applications and tests drive the cancellation
    /// path.
    pub fn detached(exit: impl Fn(i32) + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(Inner {
                armed: Mutex::new(None),
                exit: Box::new(exit),
            }),
        }
    }

    /// Arms the registration with `handler` until the returned guard is
    /// dropped.
    ///
    /// Only one handler is armed at a time; arming again replaces the
    /// previous handler, and only one session should be active per process.
    pub fn arm(&self, handler: impl Fn() + Send + Sync + 'static) -> Armed {
        *self.lock() = Some(Arc::new(handler));
        Armed {
            interrupts: self.clone(),
        }
    }

    pub fn is_armed(&self) -> bool {
        self.lock().is_some()
    }

    /// Delivers an interrupt: runs the armed handler, then the exit hook.
    pub fn raise(&self) {
        // Clone out of the lock so a slow handler cannot block disarming.
        let handler = self.lock().clone();
        match handler {
            Some(handler) => {
                debug!("interrupt received, running armed handler");
                handler();
            }
            None => debug!("interrupt received with nothing armed"),
        }
        (self.inner.exit)(INTERRUPTED_EXIT_CODE);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Handler>> {
        self.inner
            .armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Interrupts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interrupts")
            .field("armed", &self.is_armed())
            .finish()
    }
}

/// Keeps a handler armed on an [`Interrupts`] registration.
#[must_use = "the handler is disarmed as soon as this guard is dropped"]
pub struct Armed {
    interrupts: Interrupts,
}

impl Drop for Armed {
    fn drop(&mut self) {
        *self.interrupts.lock() = None;
    }
}
