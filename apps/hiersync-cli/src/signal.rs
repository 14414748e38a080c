//! Ctrl-C handling.

use std::sync::atomic::{AtomicBool, Ordering};

/// What to do about a received interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    /// Let the run stop at its next checkpoint.
    Graceful,
    /// An earlier interrupt is still pending; exit now.
    Exit,
}

/// Record an interrupt in `flag`.
pub fn record_interrupt(flag: &AtomicBool) -> InterruptAction {
    if flag.swap(true, Ordering::SeqCst) {
        InterruptAction::Exit
    } else {
        InterruptAction::Graceful
    }
}
