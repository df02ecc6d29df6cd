//! The subscription a session is currently looking at.
//!
//! Every selection bumps a generation counter. Pull and acknowledge calls
//! capture the generation before going to the broker and drop their result
//! if it changed while they were in flight.

use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Target {
    subscription: RwLock<Option<String>>,
    generation: AtomicU64,
}

impl Target {
    pub fn new(subscription: Option<String>) -> Self {
        Self {
            subscription: RwLock::new(subscription),
            generation: AtomicU64::new(0),
        }
    }

    /// Switch to `subscription`, returning the new generation.
    pub fn select(&self, subscription: impl Into<String>) -> u64 {
        let mut slot = self
            .subscription
            .write()
            .unwrap_or_else(|e| e.into_inner());
        *slot = Some(subscription.into());
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn subscription(&self) -> Option<String> {
        self.subscription
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Subscription and generation read together.
    pub fn current(&self) -> Option<(String, u64)> {
        let slot = self.subscription.read().unwrap_or_else(|e| e.into_inner());
        slot.clone().map(|s| (s, self.generation()))
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }
}
