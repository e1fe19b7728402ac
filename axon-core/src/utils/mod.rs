use crate::error::AxonError;
use std::sync::{Mutex, MutexGuard};

pub mod testing;

/// Locks `mutex`, reporting a poisoned lock as `AxonError::LockError`.
pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, AxonError> {
    mutex.lock().map_err(|e| AxonError::LockError {
        lock_type: format!("{} mutex", what),
        reason: e.to_string(),
    })
}
