//! Delivery of ordered consensus updates to registered modules.
//!
//! Each subscriber gets a dedicated delivery thread fed by a bounded
//! channel. Publication pushes into every channel in registration order, so
//! a subscriber observes every update exactly once, in chain order, with
//! `reverted` preceding `applied`. Updates are never dropped: a subscriber
//! that falls more than [`NOTIFY_BUFFER`] updates behind blocks the
//! publisher, and with it further consensus writes.

use crossbeam_channel::{bounded, Sender};
use log::error;
use parking_lot::Mutex;
use silo_consensus_core::block::Block;
use std::sync::Arc;
use std::thread::JoinHandle;

/// How many undelivered updates a subscriber may accumulate before it
/// starts exerting backpressure on consensus.
pub const NOTIFY_BUFFER: usize = 3;

/// One consensus set change: the blocks leaving the current path in
/// descending height order, then the blocks joining it in ascending order.
#[derive(Clone, Debug)]
pub struct ConsensusSetUpdate {
    pub reverted: Vec<Block>,
    pub applied: Vec<Block>,
}

/// A module interested in consensus set changes. Implementations must not
/// attempt to take the consensus write lock from inside the callback.
pub trait ConsensusSetSubscriber: Send + Sync {
    fn receive_consensus_set_update(&self, reverted: &[Block], applied: &[Block]);
}

struct Subscription {
    sender: Sender<Arc<ConsensusSetUpdate>>,
    worker: JoinHandle<()>,
}

/// Fan-out of consensus updates. Register-only; subscriptions live until
/// [`SubscriberBus::close`].
pub struct SubscriberBus {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl SubscriberBus {
    pub fn new() -> Self {
        Self { subscriptions: Mutex::new(Vec::new()) }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn ConsensusSetSubscriber>) {
        let (sender, receiver) = bounded::<Arc<ConsensusSetUpdate>>(NOTIFY_BUFFER);
        let mut subscriptions = self.subscriptions.lock();
        let worker = std::thread::Builder::new()
            .name(format!("notify-{}", subscriptions.len()))
            .spawn(move || {
                while let Ok(update) = receiver.recv() {
                    subscriber.receive_consensus_set_update(&update.reverted, &update.applied);
                }
            })
            .expect("spawning a delivery thread must succeed");
        subscriptions.push(Subscription { sender, worker });
    }

    /// Queues `update` for every subscriber, blocking on any subscriber
    /// that is `NOTIFY_BUFFER` updates behind.
    pub fn publish(&self, update: ConsensusSetUpdate) {
        let update = Arc::new(update);
        for subscription in self.subscriptions.lock().iter() {
            if subscription.sender.send(update.clone()).is_err() {
                error!("a subscriber delivery thread has died; its updates are lost");
            }
        }
    }

    /// Drains and joins every delivery thread. Queued updates are still
    /// delivered before the threads exit.
    pub fn close(&self) {
        let subscriptions: Vec<_> = self.subscriptions.lock().drain(..).collect();
        for subscription in subscriptions {
            drop(subscription.sender);
            if subscription.worker.join().is_err() {
                error!("a subscriber delivery thread panicked during shutdown");
            }
        }
    }
}

impl Default for SubscriberBus {
    fn default() -> Self {
        Self::new()
    }
}
