//! The `store` module holds the authoritative local view of pulled messages.
//!
//! It is shared between the pull scheduler, the acknowledger and the lease
//! timer of one session as a `SharedStore`.

pub mod engine;
pub mod message;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use engine::{Admission, MessageStore, Query, ReconcileSummary};
pub use message::{AckId, Delivery, Message, MessageId, MessageStatus};

pub type SharedStore = Arc<Mutex<MessageStore>>;

pub fn shared() -> SharedStore {
    Arc::new(Mutex::new(MessageStore::new()))
}

/// Lock the store, ignoring poisoning.
pub fn lock(store: &SharedStore) -> MutexGuard<'_, MessageStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests;
