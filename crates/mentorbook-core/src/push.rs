//! Push-notification collaborator: subscribe-by-filter change signals.
//!
//! A notice only says "this event changed". Receivers never trust an implied
//! delta and re-read through their store instead.
//!
//! [`PushHub`] is the in-process implementation. Repositories publish the
//! old and new row image of every committed write; a subscription fires when
//! its filter matches either image, so a mentor leaving a set still hears
//! about it. Handlers run after the hub lock is released and may call back
//! into repositories or stores.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::model::{Event, EventId, MembershipColumn, MentorId};

/// `column contains mentor` predicate over one membership array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ChangeFilter {
    pub column: MembershipColumn,
    pub mentor: MentorId,
}

impl ChangeFilter {
    #[must_use]
    pub const fn new(column: MembershipColumn, mentor: MentorId) -> Self {
        Self { column, mentor }
    }

    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        event.membership.get(self.column).contains(&self.mentor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Payload-free change signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeNotice {
    pub event_id: EventId,
    pub kind: ChangeKind,
}

pub type ChangeHandler = Arc<dyn Fn(&ChangeNotice) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Subscribe-by-filter primitive.
pub trait PushChannel: Send + Sync {
    fn subscribe(&self, filter: ChangeFilter, handler: ChangeHandler) -> SubscriptionId;

    /// Returns `false` when `id` was not subscribed.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// Optional publisher hook carried by repositories.
pub trait ChangePublisher: Send + Sync {
    fn publish(&self, kind: ChangeKind, old: Option<&Event>, new: Option<&Event>);
}

struct Subscription {
    filter: ChangeFilter,
    handler: ChangeHandler,
}

/// In-process fan-out hub.
#[derive(Default)]
pub struct PushHub {
    subscriptions: Mutex<BTreeMap<SubscriptionId, Subscription>>,
    next_id: AtomicU64,
    delivered: AtomicU64,
}

impl PushHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Total handler invocations since creation.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for PushHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushHub")
            .field("subscriptions", &self.subscription_count())
            .field("delivered", &self.delivered())
            .finish()
    }
}

impl PushChannel for PushHub {
    fn subscribe(&self, filter: ChangeFilter, handler: ChangeHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(column = %filter.column, mentor = %filter.mentor, "push subscribe");
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Subscription { filter, handler });
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }
}

impl ChangePublisher for PushHub {
    fn publish(&self, kind: ChangeKind, old: Option<&Event>, new: Option<&Event>) {
        let Some(event_id) = new.or(old).map(|event| event.id.clone()) else {
            return;
        };

        let handlers: Vec<ChangeHandler> = {
            let subscriptions = self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            subscriptions
                .values()
                .filter(|sub| {
                    old.is_some_and(|event| sub.filter.matches(event))
                        || new.is_some_and(|event| sub.filter.matches(event))
                })
                .map(|sub| Arc::clone(&sub.handler))
                .collect()
        };

        if handlers.is_empty() {
            return;
        }

        let notice = ChangeNotice { event_id, kind };
        tracing::trace!(event = %notice.event_id, ?kind, fanout = handlers.len(), "push publish");
        for handler in handlers {
            handler(&notice);
            self.delivered.fetch_add(1, Ordering::Relaxed);
        }
    }
}
