use crate::error::DedupError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once, OnceLock};

static HANDLER_ONCE: Once = Once::new();
static HANDLER_ERROR: OnceLock<String> = OnceLock::new();

/// Cancellation flag raised by SIGINT/SIGTERM and polled at stage checkpoints.
///
/// Nothing is aborted from the signal handler itself: the current file
/// operation finishes, the stage notices the flag at its next checkpoint, and
/// the engine flushes state before returning.
#[derive(Clone, Default)]
pub struct InterruptCoordinator {
    flag: Arc<AtomicBool>,
}

impl InterruptCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes interrupt and termination signals to this coordinator.
    /// Only one coordinator per process can own the handler.
    pub fn install(&self) -> Result<(), DedupError> {
        let flag = self.flag.clone();
        HANDLER_ONCE.call_once(move || {
            if let Err(err) = ctrlc::set_handler(move || {
                if !flag.swap(true, Ordering::SeqCst) {
                    log::warn!("Interrupt received, finishing current step and saving state…");
                }
            }) {
                let _ = HANDLER_ERROR.set(err.to_string());
            }
        });

        match HANDLER_ERROR.get() {
            Some(err) => Err(DedupError::Signal(err.clone())),
            None => Ok(()),
        }
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Interrupts after a fixed number of checkpoints. Used to simulate a kill at
/// an arbitrary point between checkpoints.
#[derive(Clone)]
pub struct Checkpoints {
    coordinator: InterruptCoordinator,
    budget: Option<Arc<AtomicUsize>>,
}

impl Checkpoints {
    pub fn new(coordinator: InterruptCoordinator) -> Self {
        Self {
            coordinator,
            budget: None,
        }
    }

    pub fn with_budget(coordinator: InterruptCoordinator, checkpoints: usize) -> Self {
        Self {
            coordinator,
            budget: Some(Arc::new(AtomicUsize::new(checkpoints))),
        }
    }

    /// Returns true when the run should stop here.
    pub fn reached(&self) -> bool {
        if let Some(budget) = &self.budget {
            let left = budget.load(Ordering::SeqCst);
            if left == 0 {
                self.coordinator.request();
            } else {
                budget.store(left - 1, Ordering::SeqCst);
            }
        }
        self.coordinator.is_requested()
    }

    pub fn coordinator(&self) -> &InterruptCoordinator {
        &self.coordinator
    }
}
