//! Push routing for `eth_subscribe` subscriptions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chainstream_core::{PushReceiver, SubscriptionId};
use serde_json::Value;
use tokio::sync::mpsc;

/// Routes pushed results to the channel registered for their subscription.
///
/// Shared between the socket task (register, dispatch, close) and the
/// client handle (release).
#[derive(Clone, Default)]
pub struct SubscriptionRouter {
    routes: Arc<Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<Value>>>>,
}

impl SubscriptionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn routes(&self) -> MutexGuard<'_, HashMap<SubscriptionId, mpsc::UnboundedSender<Value>>> {
        // A poisoned map is still structurally valid.
        self.routes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open a channel for `id`. A previous route for the same id is replaced.
    pub fn register(&self, id: SubscriptionId) -> PushReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.routes().insert(id, tx);
        rx
    }

    /// Forward one pushed result. Returns `false` if nobody is listening,
    /// in which case the route is dropped.
    pub fn dispatch(&self, id: &SubscriptionId, result: Value) -> bool {
        let mut routes = self.routes();
        let Some(tx) = routes.get(id) else {
            tracing::debug!(subscription = %id, "push for unknown subscription");
            return false;
        };
        if tx.send(result).is_ok() {
            return true;
        }
        routes.remove(id);
        false
    }

    /// Stop routing `id`. The receiver sees the channel close.
    pub fn remove(&self, id: &SubscriptionId) -> bool {
        self.routes().remove(id).is_some()
    }

    /// Close every route (connection lost or client dropped).
    pub fn close_all(&self) -> usize {
        let mut routes = self.routes();
        let closed = routes.len();
        routes.clear();
        closed
    }

    /// Number of routed subscriptions.
    pub fn len(&self) -> usize {
        self.routes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
