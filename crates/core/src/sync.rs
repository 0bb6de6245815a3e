//! Lock helpers shared by the stores.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a store mutex, recovering the data if a previous holder panicked.
///
/// Stores compute their new state before touching the guarded map, so a
/// poisoned guard still holds a consistent value.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
