//! Push-driven cache invalidation for a mentor session.
//!
//! Three subscriptions, one per membership column, each filtered on the
//! session's mentor id. Every notice triggers a full [`EventStore::refetch`];
//! notices are never applied as deltas. Refetch errors are logged and
//! swallowed because nobody is waiting on the push path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::model::{MembershipColumn, MentorId};
use crate::push::{ChangeFilter, ChangeNotice, PushChannel, SubscriptionId};
use crate::store::EventStore;

pub struct RealtimeInvalidator {
    push: Arc<dyn PushChannel>,
    mentor: MentorId,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    triggers: Arc<AtomicU64>,
}

impl std::fmt::Debug for RealtimeInvalidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeInvalidator")
            .field("mentor", &self.mentor)
            .field("active", &self.is_active())
            .field("triggers", &self.trigger_count())
            .finish_non_exhaustive()
    }
}

impl RealtimeInvalidator {
    /// Subscribe `requesting`, `accepted` and `declined` filters for `mentor`.
    #[must_use]
    pub fn start(push: Arc<dyn PushChannel>, store: &Arc<EventStore>, mentor: MentorId) -> Self {
        let triggers = Arc::new(AtomicU64::new(0));
        let subscriptions = MembershipColumn::ALL
            .into_iter()
            .map(|column| {
                let store = Arc::downgrade(store);
                let triggers = Arc::clone(&triggers);
                let mentor_id = mentor.clone();
                push.subscribe(
                    ChangeFilter::new(column, mentor.clone()),
                    Arc::new(move |notice: &ChangeNotice| {
                        triggers.fetch_add(1, Ordering::SeqCst);
                        let Some(store) = store.upgrade() else {
                            return;
                        };
                        if let Err(err) = store.refetch() {
                            tracing::warn!(
                                mentor = %mentor_id,
                                event = %notice.event_id,
                                %column,
                                %err,
                                "push-triggered refetch failed"
                            );
                        }
                    }),
                )
            })
            .collect();

        tracing::debug!(%mentor, "realtime invalidation started");
        Self {
            push,
            mentor,
            subscriptions: Mutex::new(subscriptions),
            triggers,
        }
    }

    /// Unsubscribe all filters. Further calls are no-ops.
    pub fn stop(&self) {
        let ids = std::mem::take(
            &mut *self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if ids.is_empty() {
            return;
        }
        for id in ids {
            self.push.unsubscribe(id);
        }
        tracing::debug!(mentor = %self.mentor, "realtime invalidation stopped");
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Notices received since start.
    #[must_use]
    pub fn trigger_count(&self) -> u64 {
        self.triggers.load(Ordering::SeqCst)
    }

    #[must_use]
    pub const fn mentor(&self) -> &MentorId {
        &self.mentor
    }
}

impl Drop for RealtimeInvalidator {
    fn drop(&mut self) {
        self.stop();
    }
}
