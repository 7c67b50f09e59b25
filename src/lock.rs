//! Process-wide conversion lock.
//!
//! Everything that drives a live application instance serializes on this
//! one mutex: conversions, and discovery probes that attach to check a
//! running install. Code that holds a discovery cache lock may acquire
//! this lock, never the other way around.

use std::sync::{Mutex, MutexGuard, PoisonError};

static CONVERSION_LOCK: Mutex<()> = Mutex::new(());

/// Block until this thread holds the exclusive right to drive automation.
/// A panic in a previous holder does not invalidate the lock.
pub(crate) fn acquire() -> MutexGuard<'static, ()> {
    CONVERSION_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}
