//! Topic management for the in-memory broker
//!
//! A `Topic` holds the names of the subscriptions attached to it. Publishing
//! to a topic fans the message out to each of them. Duplicate attachments are
//! a no-op.

use std::collections::BTreeSet;

#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscriptions: BTreeSet<String>,
}

impl Topic {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscriptions: BTreeSet::new(),
        }
    }

    pub fn attach(&mut self, subscription: &str) {
        self.subscriptions.insert(subscription.to_string());
    }

    pub fn detach(&mut self, subscription: &str) {
        self.subscriptions.remove(subscription);
    }
}
