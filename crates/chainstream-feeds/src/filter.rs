//! Server-side filter lifecycle: install, poll changes, reinstall on expiry,
//! uninstall on close.

use std::marker::PhantomData;
use std::time::Instant;

use async_trait::async_trait;
use chainstream_core::{codec, ChainItem, FilterCriteria, RpcClient};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::handle::{Release, StreamHandle};
use crate::polling::{PollSource, PollingEngine};

/// What a filter watches.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterKind {
    /// Logs matching the criteria; changes are `Log` records.
    Logs(FilterCriteria),
    /// New block hashes.
    Blocks,
    /// Pending transaction hashes.
    PendingTransactions,
}

impl FilterKind {
    fn install_method(&self) -> &'static str {
        match self {
            Self::Logs(_) => "newFilter",
            Self::Blocks => "newBlockFilter",
            Self::PendingTransactions => "newPendingTransactionFilter",
        }
    }

    fn install_params(&self) -> Vec<Value> {
        match self {
            Self::Logs(criteria) => vec![criteria.to_filter_params()],
            Self::Blocks | Self::PendingTransactions => vec![],
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Logs(_) => "logs",
            Self::Blocks => "blocks",
            Self::PendingTransactions => "pending-transactions",
        }
    }
}

/// A filter currently installed on the node.
#[derive(Debug, Clone)]
pub struct ActiveFilter {
    pub filter_id: String,
    pub kind: FilterKind,
    pub last_polled_at: Option<Instant>,
}

/// Opens filter-backed polling streams.
pub struct FilterLifecycleManager;

impl FilterLifecycleManager {
    /// Install a filter of `kind` and poll its changes as `T`.
    ///
    /// Installation errors are returned here and no stream is created.
    pub async fn open<T>(
        client: &RpcClient,
        kind: FilterKind,
        config: &StreamConfig,
        token: CancellationToken,
    ) -> Result<StreamHandle<T>, StreamError>
    where
        T: DeserializeOwned + ChainItem,
    {
        if let FilterKind::Logs(criteria) = &kind {
            criteria.validate().map_err(StreamError::InvalidCriteria)?;
        }
        let filter_id = install(client, &kind).await?;
        info!(filter_id = %filter_id, kind = kind.label(), "filter installed");

        let source = FilterSource::<T> {
            client: client.clone(),
            filter: ActiveFilter {
                filter_id,
                kind,
                last_polled_at: None,
            },
            reinstalls: 0,
            _item: PhantomData,
        };
        Ok(PollingEngine::spawn(source, config.poll_settings(), token))
    }
}

async fn install(client: &RpcClient, kind: &FilterKind) -> Result<String, StreamError> {
    let raw = client.call_ns(kind.install_method(), kind.install_params()).await?;
    Ok(codec::decode_id(raw)?)
}

struct FilterSource<T> {
    client: RpcClient,
    filter: ActiveFilter,
    reinstalls: u32,
    _item: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> FilterSource<T> {
    async fn changes(&mut self) -> Result<Vec<T>, StreamError> {
        let params = vec![Value::String(self.filter.filter_id.clone())];
        match self.client.call_ns("getFilterChanges", params).await {
            Ok(raw) => {
                self.filter.last_polled_at = Some(Instant::now());
                Ok(codec::decode_list(raw)?)
            }
            Err(e) if e.is_filter_not_found() => Err(StreamError::FilterExpired {
                filter_id: self.filter.filter_id.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl<T> PollSource for FilterSource<T>
where
    T: DeserializeOwned + ChainItem,
{
    type Item = T;

    async fn fetch(&mut self) -> Result<Vec<T>, StreamError> {
        match self.changes().await {
            Err(StreamError::FilterExpired { filter_id }) => {
                // Whatever the node collected between expiry and now is lost.
                warn!(filter_id = %filter_id, kind = self.filter.kind.label(), "filter expired, reinstalling");
                let fresh = install(&self.client, &self.filter.kind).await?;
                self.reinstalls += 1;
                info!(old = %filter_id, new = %fresh, reinstalls = self.reinstalls, "filter reinstalled");
                self.filter.filter_id = fresh;
                Ok(Vec::new())
            }
            other => other,
        }
    }
}

#[async_trait]
impl<T: 'static> Release for FilterSource<T> {
    async fn release(&mut self) {
        let id = &self.filter.filter_id;
        match self
            .client
            .call_ns("uninstallFilter", vec![Value::String(id.clone())])
            .await
        {
            Ok(removed) => debug!(filter_id = %id, removed = removed.as_bool().unwrap_or(false), "filter uninstalled"),
            Err(e) => warn!(filter_id = %id, error = %e, "failed to uninstall filter"),
        }
    }
}
