//! In-memory message broker
//!
//! The pure in-memory adapter never blocks beyond acquiring its internal
//! locks, except for the explicit bounded wait in `consume_work`. Work
//! queues are plain deques guarded by a mutex with a `Notify` to wake
//! blocked consumers; fan-out inboxes are per-subscriber unbounded
//! channels, so a subscriber only ever sees messages sent after its
//! channel existed.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::messages::Message;

use super::{FanoutInbox, FanoutSubscription, MessageBroker};

/// One named work queue: pending items plus a wakeup for blocked consumers
#[derive(Default)]
struct WorkQueue {
    items: Mutex<VecDeque<Message>>,
    notify: Notify,
}

impl WorkQueue {
    fn push(&self, message: Message) {
        self.items.lock().unwrap().push_back(message);
        // One message wakes one competing consumer
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Message> {
        self.items.lock().unwrap().pop_front()
    }

    fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    fn clear(&self) {
        self.items.lock().unwrap().clear();
    }
}

/// In-memory broker implementing both delivery semantics.
///
/// The queue and topic maps are each guarded by a single mutex; neither
/// lock is ever held across an await point. Coarse granularity is
/// deliberate — the exactly-once and ordering invariants are what matter,
/// not lock contention at this scale.
#[derive(Default)]
pub struct InMemoryBroker {
    work_queues: Mutex<HashMap<String, Arc<WorkQueue>>>,
    fanout: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Message>>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or lazily create the named work queue
    fn work_queue(&self, queue: &str) -> Arc<WorkQueue> {
        let mut queues = self.work_queues.lock().unwrap();
        queues.entry(queue.to_owned()).or_default().clone()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish_work(&self, queue: &str, message: Message) -> Result<()> {
        self.work_queue(queue).push(message);
        Ok(())
    }

    async fn consume_work(&self, queue: &str, timeout: Duration) -> Result<Option<Message>> {
        let queue = self.work_queue(queue);
        if let Some(message) = queue.pop() {
            return Ok(Some(message));
        }
        if timeout.is_zero() {
            return Ok(None);
        }
        let deadline = Instant::now() + timeout;
        loop {
            // Register for wakeup before re-checking, so a publish that
            // lands between the check and the await is not missed.
            let notified = queue.notify.notified();
            if let Some(message) = queue.pop() {
                return Ok(Some(message));
            }
            match tokio::time::timeout_at(deadline, notified).await {
                // Woken; another consumer may have raced us to the item,
                // so loop and re-check rather than assuming it is ours.
                Ok(()) => {
                    if let Some(message) = queue.pop() {
                        return Ok(Some(message));
                    }
                }
                Err(_) => return Ok(None),
            }
        }
    }

    async fn queue_depth(&self, queue: &str) -> Result<usize> {
        let queues = self.work_queues.lock().unwrap();
        Ok(queues.get(queue).map(|q| q.len()).unwrap_or(0))
    }

    async fn subscribe_fanout(&self, topic: &str) -> Result<FanoutSubscription> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut fanout = self.fanout.lock().unwrap();
        fanout.entry(topic.to_owned()).or_default().push(tx);
        Ok(Box::new(MemoryInbox { rx }))
    }

    async fn publish_fanout(&self, topic: &str, message: Message) -> Result<()> {
        let mut fanout = self.fanout.lock().unwrap();
        if let Some(subscribers) = fanout.get_mut(topic) {
            // Dropped inbox handles are reaped here; a failed send means
            // the receiver side is gone, never a lost delivery.
            subscribers.retain(|tx| tx.send(message.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscriber_count(&self, topic: &str) -> Result<usize> {
        let mut fanout = self.fanout.lock().unwrap();
        Ok(match fanout.get_mut(topic) {
            Some(subscribers) => {
                subscribers.retain(|tx| !tx.is_closed());
                subscribers.len()
            }
            None => 0,
        })
    }

    async fn purge_all(&self) -> Result<()> {
        let queues = self.work_queues.lock().unwrap();
        for queue in queues.values() {
            queue.clear();
        }
        Ok(())
    }
}

struct MemoryInbox {
    rx: mpsc::UnboundedReceiver<Message>,
}

#[async_trait]
impl FanoutInbox for MemoryInbox {
    async fn try_next(&mut self) -> Result<Option<Message>> {
        match self.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(Error::Unavailable(
                "fan-out subscription detached from broker".into(),
            )),
        }
    }
}
