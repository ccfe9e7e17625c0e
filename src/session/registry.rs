//! Per-topic message handler registry
//!
//! Holds one handler per subscription filter and dispatches incoming messages to
//! every handler whose filter matches, using MQTT wildcard rules.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Callback invoked with `(topic, payload)` for each matching message
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Filter → handler map, safe to share with the transport's event task
#[derive(Default, Clone)]
pub struct TopicRegistry {
    handlers: Arc<RwLock<HashMap<String, MessageHandler>>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `filter`, replacing any previous handler for the same filter
    pub fn insert(&self, filter: &str, handler: MessageHandler) {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if handlers.insert(filter.to_string(), handler).is_some() {
            debug!(filter = %filter, "Replaced message handler");
        }
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.read().contains_key(filter)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Registered filters, sorted
    pub fn filters(&self) -> Vec<String> {
        let mut filters: Vec<String> = self.read().keys().cloned().collect();
        filters.sort();
        filters
    }

    /// Invoke every handler whose filter matches `topic`; returns how many ran
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> usize {
        // Handlers run outside the lock so they may register further handlers
        let matched: Vec<MessageHandler> = self
            .read()
            .iter()
            .filter(|(filter, _)| topic_matches(filter, topic))
            .map(|(_, handler)| handler.clone())
            .collect();

        if matched.is_empty() {
            warn!(topic = %topic, "No handler registered for incoming message");
        }

        for handler in &matched {
            handler(topic, payload);
        }
        matched.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, MessageHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for TopicRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicRegistry")
            .field("filters", &self.filters())
            .finish()
    }
}

/// MQTT topic filter matching
///
/// `+` matches exactly one level, `#` matches the parent level and everything below
/// it and is only valid as the last level. Topics starting with `$` are not matched
/// by a leading wildcard.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/').peekable();
    let mut topic_levels = topic.split('/');

    while let Some(filter_level) = filter_levels.next() {
        match filter_level {
            "#" => return filter_levels.peek().is_none(),
            "+" => {
                if topic_levels.next().is_none() {
                    return false;
                }
            }
            exact => match topic_levels.next() {
                Some(topic_level) if topic_level == exact => {}
                _ => return false,
            },
        }
    }

    topic_levels.next().is_none()
}
