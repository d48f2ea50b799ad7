pub mod builder;
pub mod cache;
pub mod context;
pub mod directives;
pub mod graph;
pub mod hierarchy;
pub mod monitor;
pub mod output;
pub mod plan;
pub mod session;
pub mod task;
pub mod txn;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `m`, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
