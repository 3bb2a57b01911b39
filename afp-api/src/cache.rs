//! Bounded recent-window feature cache
//!
//! Holds the feature records seen on the fan-out topics within the last
//! cache window. The cache is pull-based: each read request drains
//! whatever is pending in the subscriptions and evicts entries older than
//! the window, so no background task is needed.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use afp_common::broker::{FanoutInbox, FanoutSubscription, MessageBroker};
use afp_common::messages::{Message, FEATURES_A, FEATURES_B};
use afp_common::Result;

/// Real-time cache over both feature topics
pub struct RecentCache {
    inboxes: Mutex<Vec<FanoutSubscription>>,
    /// Entries paired with arrival time, oldest first
    entries: Mutex<VecDeque<(Message, DateTime<Utc>)>>,
    window: chrono::Duration,
}

impl RecentCache {
    /// Subscribe to both feature topics.
    ///
    /// Must run before the pipeline starts publishing; records published
    /// before this returns never reach the cache.
    pub async fn subscribe(broker: &dyn MessageBroker, window: chrono::Duration) -> Result<Self> {
        let inboxes = vec![
            broker.subscribe_fanout(FEATURES_A).await?,
            broker.subscribe_fanout(FEATURES_B).await?,
        ];
        Ok(Self {
            inboxes: Mutex::new(inboxes),
            entries: Mutex::new(VecDeque::new()),
            window,
        })
    }

    /// Pull pending records, evict stale entries, and return a snapshot
    pub async fn refresh(&self) -> Result<Vec<Message>> {
        let now = Utc::now();
        let cutoff = now - self.window;

        let mut inboxes = self.inboxes.lock().await;
        let mut entries = self.entries.lock().await;
        for inbox in inboxes.iter_mut() {
            while let Some(message) = inbox.try_next().await? {
                entries.push_back((message, now));
            }
        }
        while entries.front().is_some_and(|(_, at)| *at < cutoff) {
            entries.pop_front();
        }

        Ok(entries.iter().map(|(message, _)| message.clone()).collect())
    }
}
