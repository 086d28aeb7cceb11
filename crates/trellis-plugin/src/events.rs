//! Inter-plugin event bus.
//!
//! Events are ephemeral and delivered at most once per subscriber per
//! publish. Subscriptions resolve through the subscriber's instance slot,
//! so a reloaded plugin keeps receiving without resubscribing.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::instance::InstanceSlot;

/// An event published by a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id.
    pub id: Uuid,
    /// Event type name.
    pub event_type: String,
    /// Arbitrary payload.
    pub payload: Value,
    /// Publishing plugin.
    pub source: String,
    /// When it was published.
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Creates an event stamped now.
    pub fn new(source: &str, event_type: &str, payload: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type: event_type.to_string(),
            payload,
            source: source.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
struct Subscriber {
    plugin: String,
    slot: Weak<InstanceSlot>,
}

/// Routes events from publishers to subscribed plugins.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: DashMap<String, Vec<Subscriber>>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes `slot`'s plugin to each event type, replacing earlier
    /// subscriptions of the same plugin.
    ///
    /// Each kept event type is swapped under its own entry lock, so a
    /// concurrent publish sees either the old subscriber or the new one.
    pub fn subscribe(&self, event_types: &[String], slot: &Arc<InstanceSlot>) {
        let plugin = slot.plugin().to_string();
        let wanted: HashSet<&str> = event_types.iter().map(String::as_str).collect();

        for event_type in &wanted {
            let mut subs = self.subscribers.entry(event_type.to_string()).or_default();
            subs.retain(|s| s.plugin != plugin);
            subs.push(Subscriber {
                plugin: plugin.clone(),
                slot: Arc::downgrade(slot),
            });
        }
        for mut entry in self.subscribers.iter_mut() {
            if !wanted.contains(entry.key().as_str()) {
                entry.value_mut().retain(|s| s.plugin != plugin);
            }
        }
        self.subscribers.retain(|_, subs| !subs.is_empty());
        debug!(plugin = %plugin, events = wanted.len(), "Event subscriptions registered");
    }

    /// Removes every subscription of `plugin`.
    pub fn unsubscribe_all(&self, plugin: &str) {
        for mut entry in self.subscribers.iter_mut() {
            entry.value_mut().retain(|s| s.plugin != plugin);
        }
        self.subscribers.retain(|_, subs| !subs.is_empty());
    }

    /// Plugins subscribed to `event_type`.
    pub fn subscribers_of(&self, event_type: &str) -> Vec<String> {
        self.subscribers
            .get(event_type)
            .map(|subs| subs.iter().map(|s| s.plugin.clone()).collect())
            .unwrap_or_default()
    }

    /// Delivers `event` to every subscriber other than its source.
    /// Returns the number of plugins that accepted it.
    pub async fn publish(&self, event: &Event) -> usize {
        let targets: Vec<Subscriber> = self
            .subscribers
            .get(&event.event_type)
            .map(|subs| subs.clone())
            .unwrap_or_default();

        let mut seen = HashSet::new();
        let mut delivered = 0;

        for target in targets {
            if target.plugin == event.source || !seen.insert(target.plugin.clone()) {
                continue;
            }
            let Some(slot) = target.slot.upgrade() else {
                continue;
            };
            let Some(guard) = slot.enter() else {
                continue;
            };
            let Some(plugin) = guard.plugin() else {
                continue;
            };

            match plugin.on_event(event).await {
                Ok(()) => {
                    guard.metrics().record_event_received();
                    delivered += 1;
                }
                Err(e) => {
                    warn!(
                        plugin = %target.plugin,
                        event = %event.event_type,
                        error = %e,
                        "Event handler failed"
                    );
                    guard.metrics().record_error(&e);
                }
            }
        }

        debug!(event = %event.event_type, source = %event.source, delivered, "Event published");
        delivered
    }
}
