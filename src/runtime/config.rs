//! Process-wide configuration
//!
//! A single integer budget of worker threads available for parallel
//! fan-out, shared by every node in the process. The default is zero (all
//! fan-out runs inline); it can be raised once at start-up via
//! [`set_num_threads`] or the `PIPELINE_NUM_THREADS` environment variable.

use std::sync::Mutex;

use lazy_static::lazy_static;
use tracing::debug;

lazy_static! {
    static ref THREAD_BUDGET: Mutex<usize> = Mutex::new(initial_budget());
}

fn initial_budget() -> usize {
    std::env::var("PIPELINE_NUM_THREADS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

/// Set the worker-thread budget. Intended to be called once at start-up;
/// workers currently borrowed from the old budget are returned against the
/// new one.
pub fn set_num_threads(count: usize) {
    debug!("worker thread budget set to {}", count);
    *THREAD_BUDGET.lock().unwrap() = count;
}

/// The number of worker threads currently available.
pub fn num_threads() -> usize {
    *THREAD_BUDGET.lock().unwrap()
}

/// Borrow one worker thread from the budget. Returns false if none are
/// available; the caller then runs inline.
pub(crate) fn try_take_thread() -> bool {
    let mut budget = THREAD_BUDGET.lock().unwrap();
    if *budget > 0 {
        *budget -= 1;
        true
    } else {
        false
    }
}

/// Return borrowed worker threads to the budget.
pub(crate) fn release_threads(count: usize) {
    if count > 0 {
        *THREAD_BUDGET.lock().unwrap() += count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_take_and_release() {
        set_num_threads(2);
        assert!(try_take_thread());
        assert!(try_take_thread());
        assert!(!try_take_thread());
        release_threads(2);
        assert_eq!(num_threads(), 2);
        set_num_threads(0);
        assert!(!try_take_thread());
    }
}
