//! Push subscriptions as streams.

use std::sync::Arc;

use async_trait::async_trait;
use chainstream_core::{codec, ChainItem, PubSubTransport, PushReceiver, RpcClient, SubscriptionId, TransportError};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::handle::{channel, Emitter, Lease, Release, StreamHandle};
use crate::item::StreamItem;

/// Turns a server-push subscription into a [`StreamHandle`].
pub struct NotificationBridge;

impl NotificationBridge {
    /// Subscribe once with `subscribe_method`/`params` and forward every push.
    ///
    /// Fails with [`TransportError::PushUnsupported`] when the client has no
    /// push-capable transport. On close, the routing entry is released and
    /// `unsubscribe_method` is called once, best-effort.
    pub async fn open<T>(
        client: &RpcClient,
        subscribe_method: &str,
        params: Vec<Value>,
        unsubscribe_method: &str,
        config: &StreamConfig,
        token: CancellationToken,
    ) -> Result<StreamHandle<T>, StreamError>
    where
        T: DeserializeOwned + ChainItem,
    {
        let pubsub = client.pubsub().cloned().ok_or(TransportError::PushUnsupported)?;
        let request = client.request(subscribe_method, params);
        let (id, pushes) = pubsub.subscribe(request).await?;
        info!(subscription = %id, method = subscribe_method, "subscribed");

        let lease = Lease::new(Subscription {
            client: client.clone(),
            pubsub,
            id,
            unsubscribe_method: unsubscribe_method.to_string(),
        });
        let (emitter, handle) = channel(config.channel_capacity, token);
        tokio::spawn(forward(lease, pushes, emitter));
        Ok(handle)
    }
}

async fn forward<T>(subscription: Lease<Subscription>, mut pushes: PushReceiver, emitter: Emitter<T>)
where
    T: DeserializeOwned + ChainItem,
{
    loop {
        let push = tokio::select! {
            biased;
            _ = emitter.cancelled() => break,
            push = pushes.recv() => push,
        };
        let Some(raw) = push else {
            warn!(subscription = %subscription.id, "push channel closed");
            let closed = TransportError::SubscriptionClosed { id: subscription.id.to_string() };
            emitter.emit(Err(closed.into())).await;
            break;
        };
        match codec::decode::<T>(raw) {
            Ok(item) => {
                if !emitter.emit(Ok(StreamItem::classify(item))).await {
                    break;
                }
            }
            Err(e) => {
                warn!(subscription = %subscription.id, error = %e, "undecodable push");
                emitter.emit(Err(e.into())).await;
                break;
            }
        }
    }
    subscription.release().await;
}

struct Subscription {
    client: RpcClient,
    pubsub: Arc<dyn PubSubTransport>,
    id: SubscriptionId,
    unsubscribe_method: String,
}

#[async_trait]
impl Release for Subscription {
    async fn release(&mut self) {
        self.pubsub.release(&self.id);
        let params = vec![Value::String(self.id.to_string())];
        match self.client.call(&self.unsubscribe_method, params).await {
            Ok(_) => debug!(subscription = %self.id, "unsubscribed"),
            Err(e) => warn!(subscription = %self.id, error = %e, "unsubscribe failed"),
        }
    }
}
