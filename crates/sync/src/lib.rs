// scout-sync: realtime state synchronization for brief views.

pub mod backend;
pub mod brief;
pub mod channel;
pub mod chat;
pub mod collection;
pub mod config;
pub mod error;
pub mod kpi;
pub mod realtime;
pub mod role;
pub mod session;
pub mod solutions;
pub mod suppliers;

#[cfg(test)]
pub(crate) mod test_support;

pub use brief::{BriefSession, BriefView, SessionDeps};
pub use config::ClientConfig;
pub use error::{Result, SyncError};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a cache mutex, ignoring poisoning.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
