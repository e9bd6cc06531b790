//! In-process progress fan-out, keyed by task id.
//!
//! [`ProgressBroadcaster`] is pure routing: it holds no task state and
//! does not know who its listeners are. Any number of subscribers may
//! watch the same task (a list view and a detail view at once); publishing
//! to a task with zero subscribers is a no-op.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use reelgen_core::types::DbId;
use tokio::sync::mpsc;

use crate::events::ProgressUpdate;

/// A live subscription to one task's progress updates.
///
/// Dropping the receiver is enough to stop receiving; the broadcaster
/// prunes closed channels on the next publish. Call
/// [`ProgressBroadcaster::unsubscribe`] to remove the entry eagerly.
pub struct ProgressSubscription {
    pub task_id: DbId,
    /// Token identifying this subscription for `unsubscribe`.
    pub token: u64,
    pub receiver: mpsc::UnboundedReceiver<ProgressUpdate>,
}

/// Publish/subscribe hub distributing estimator output per task id.
#[derive(Default)]
pub struct ProgressBroadcaster {
    subscribers: RwLock<HashMap<DbId, HashMap<u64, mpsc::UnboundedSender<ProgressUpdate>>>>,
    next_token: AtomicU64,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one task's updates.
    pub fn subscribe(&self, task_id: DbId) -> ProgressSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(task_id)
            .or_default()
            .insert(token, tx);

        ProgressSubscription {
            task_id,
            token,
            receiver: rx,
        }
    }

    /// Remove a subscription. Idempotent: unknown tokens are ignored.
    pub fn unsubscribe(&self, task_id: DbId, token: u64) {
        let mut map = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        if let Some(listeners) = map.get_mut(&task_id) {
            listeners.remove(&token);
            if listeners.is_empty() {
                map.remove(&task_id);
            }
        }
    }

    /// Fan an update out to all current subscribers for its task id.
    ///
    /// Synchronous; per-task ordering follows the caller's publish order.
    /// Listeners whose receiver has been dropped are pruned here.
    pub fn publish(&self, update: &ProgressUpdate) {
        let mut map = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        let Some(listeners) = map.get_mut(&update.task_id) else {
            return;
        };

        listeners.retain(|_, tx| tx.send(update.clone()).is_ok());
        if listeners.is_empty() {
            map.remove(&update.task_id);
        }
    }

    /// Number of live subscriptions for a task.
    pub fn subscriber_count(&self, task_id: DbId) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&task_id)
            .map(|l| l.len())
            .unwrap_or(0)
    }
}
