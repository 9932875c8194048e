//! Per-connection store of topic filters and their callbacks.
//!
//! Entries live in numbered slots that never move, so an in-flight callback
//! can release its entry by index after the registry lock was dropped. An
//! entry removed while callbacks still hold it is tombstoned: it no longer
//! matches anything, and its slot is freed by the last release.

use std::sync::Arc;

use courier_core::{qos::QoS, topic::topic_matches};
use tracing::{debug, error};

use crate::{
    client::MqttConnection,
    connection::{lock, Shared},
    error::{MqttError, Result},
    event::PublishCallbackParam,
    info::{CallbackInfo, PublishInfo, Subscription},
};

#[derive(Debug, Clone)]
pub(crate) struct SubscriptionEntry {
    pub(crate) topic_filter: Arc<str>,
    pub(crate) qos: QoS,
    pub(crate) callback: Option<CallbackInfo<PublishCallbackParam>>,
    /// SUBSCRIBE packet that created the entry, and the entry's position in it.
    pub(crate) packet_id: u16,
    pub(crate) order: usize,
    pub(crate) references: usize,
    pub(crate) unsubscribed: bool,
}

impl SubscriptionEntry {
    fn is_live(&self) -> bool {
        !self.unsubscribed
    }
}

/// Selects entries created by one SUBSCRIBE packet. `order: None` selects
/// every entry of the packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PacketMatch {
    pub(crate) packet_id: u16,
    pub(crate) order: Option<usize>,
}

enum Undo {
    Inserted(usize),
    Replaced(usize, SubscriptionEntry),
}

#[derive(Debug)]
pub(crate) struct SubscriptionRegistry {
    slots: Vec<Option<SubscriptionEntry>>,
    capacity: usize,
}

impl SubscriptionRegistry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            capacity,
        }
    }

    /// Adds every subscription of `list` or none of them.
    ///
    /// A live entry with the same topic filter is updated in place instead of
    /// duplicated; its reference count carries over.
    pub(crate) fn add(&mut self, packet_id: u16, list: &[Subscription]) -> Result<()> {
        let mut undo = Vec::with_capacity(list.len());

        for (order, subscription) in list.iter().enumerate() {
            let entry = SubscriptionEntry {
                topic_filter: Arc::from(subscription.topic_filter.as_str()),
                qos: subscription.qos,
                callback: subscription.callback.clone(),
                packet_id,
                order,
                references: 0,
                unsubscribed: false,
            };

            let existing = self.slots.iter().position(|slot| {
                slot.as_ref().map_or(false, |existing| {
                    existing.is_live() && *existing.topic_filter == *subscription.topic_filter
                })
            });

            if let Some(index) = existing {
                if let Some(previous) = self.slots[index].replace(entry) {
                    if let Some(updated) = self.slots[index].as_mut() {
                        updated.references = previous.references;
                    }
                    undo.push(Undo::Replaced(index, previous));
                }
            } else if let Some(index) = self.slots.iter().position(Option::is_none) {
                self.slots[index] = Some(entry);
                undo.push(Undo::Inserted(index));
            } else if self.slots.len() < self.capacity {
                self.slots.push(Some(entry));
                undo.push(Undo::Inserted(self.slots.len() - 1));
            } else {
                error!(
                    topic_filter = %entry.topic_filter,
                    capacity = self.capacity,
                    "Subscription registry is full."
                );
                self.rollback(undo);
                return Err(MqttError::NoMemory);
            }
        }

        Ok(())
    }

    fn rollback(&mut self, undo: Vec<Undo>) {
        for step in undo.into_iter().rev() {
            match step {
                Undo::Inserted(index) => self.slots[index] = None,
                Undo::Replaced(index, previous) => self.slots[index] = Some(previous),
            }
        }
    }

    /// Index of the first live entry at or after `start` whose filter
    /// matches `topic_name`.
    pub(crate) fn find_first_match(&self, start: usize, topic_name: &str, exact_only: bool) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .skip(start)
            .find_map(|(index, slot)| match slot {
                Some(entry)
                    if entry.is_live() && topic_matches(&entry.topic_filter, topic_name, exact_only) =>
                {
                    Some(index)
                }
                _ => None,
            })
    }

    pub(crate) fn get(&self, index: usize) -> Option<&SubscriptionEntry> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub(crate) fn remove_all_matches(&mut self, matching: PacketMatch) {
        let indices: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let entry = slot.as_ref()?;
                let selected = entry.is_live()
                    && entry.packet_id == matching.packet_id
                    && matching.order.map_or(true, |order| entry.order == order);
                selected.then_some(index)
            })
            .collect();

        for index in indices {
            self.remove(index);
        }
    }

    /// Removes the live entries for `filters`. Removing a filter that is
    /// not registered does nothing.
    pub(crate) fn remove_by_topic_filter<S: AsRef<str>>(&mut self, filters: &[S]) {
        for filter in filters {
            if let Some(index) = self.find_first_match(0, filter.as_ref(), true) {
                self.remove(index);
            }
        }
    }

    fn remove(&mut self, index: usize) {
        let Some(entry) = self.slots.get_mut(index).and_then(Option::as_mut) else {
            return;
        };

        if entry.references > 0 {
            debug!(topic_filter = %entry.topic_filter, "Subscription in use, deferring removal.");
            entry.unsubscribed = true;
        } else {
            debug!(topic_filter = %entry.topic_filter, "Removed subscription.");
            self.slots[index] = None;
        }
    }

    fn acquire(&mut self, index: usize) -> Option<&SubscriptionEntry> {
        let entry = self.slots.get_mut(index)?.as_mut()?;
        entry.references += 1;
        Some(entry)
    }

    pub(crate) fn release(&mut self, index: usize) {
        let Some(entry) = self.slots.get_mut(index).and_then(Option::as_mut) else {
            return;
        };

        entry.references = entry.references.saturating_sub(1);

        if entry.references == 0 && entry.unsubscribed {
            self.slots[index] = None;
        }
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.iter().flatten().filter(|entry| entry.is_live()).count()
    }
}

/// Delivers `message` to every matching subscription.
///
/// The caller must hold one connection reference for the whole dispatch;
/// it is released once every callback has been scheduled. Each scheduled
/// callback holds its own connection and subscription reference until it
/// returns.
pub(crate) fn invoke_callbacks(shared: &Arc<Shared>, message: &PublishInfo) {
    let mut start = 0;

    loop {
        let matched = {
            let mut registry = lock(&shared.subscriptions);

            registry
                .find_first_match(start, &message.topic_name, false)
                .and_then(|index| {
                    let entry = registry.acquire(index)?;
                    Some((index, Arc::clone(&entry.topic_filter), entry.callback.clone()))
                })
        };

        let Some((index, topic_filter, callback)) = matched else {
            break;
        };
        start = index + 1;

        if !shared.increment_references() {
            lock(&shared.subscriptions).release(index);
            break;
        }

        let Some(callback) = callback else {
            lock(&shared.subscriptions).release(index);
            shared.decrement_references();
            continue;
        };

        debug!(topic_filter = %topic_filter, topic_name = %message.topic_name, "Invoking subscription callback.");

        let param = PublishCallbackParam {
            connection: MqttConnection::from_shared(Arc::clone(shared)),
            topic_filter,
            message: message.clone(),
        };
        let dispatched = Arc::clone(shared);

        shared.config.callback_dispatch.run(move || {
            callback.invoke(param);

            lock(&dispatched.subscriptions).release(index);
            dispatched.decrement_references();
        });
    }

    shared.decrement_references();
}
