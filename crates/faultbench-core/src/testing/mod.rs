//! In-process test doubles for deterministic engine tests.
//!
//! The fakes share their state through `Clone`, so a test keeps one handle
//! for assertions while the engine owns another.

mod application;
mod cluster;
mod injector;

pub use application::{FakeApplication, ScriptedWorkload, WorkloadScript};
pub use cluster::FakeCluster;
pub use injector::FakeInjector;

use std::sync::{Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
