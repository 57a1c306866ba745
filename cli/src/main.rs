//! chainstream CLI: follow and replay chain data from the terminal.
//!
//! Usage:
//! ```bash
//! # Current head
//! chainstream head --url https://cloudflare-eth.com
//!
//! # Follow new blocks, starting from history
//! chainstream blocks --url http://localhost:8545 --from 19000000
//!
//! # Follow pushed heads over WebSocket
//! chainstream heads --ws ws://localhost:8546
//!
//! # Follow a contract's logs
//! chainstream logs --url http://localhost:8545 --address 0xA0b8...eB48 --topic 0xddf2...
//!
//! # Replay a bounded range, newest first
//! chainstream replay --url http://localhost:8545 --from 100 --to 200 --desc
//! ```

mod logging;

use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use serde::Serialize;
use serde_json::json;

use chainstream_core::{BlockNumber, ChainItem, FilterCriteria, RpcClient, TopicFilter};
use chainstream_feeds::{ChainStreams, StreamConfig, StreamHandle, StreamItem};
use chainstream_http::HttpRpcClient;
use chainstream_ws::{WsClientConfig, WsRpcClient};

use crate::logging::{init_tracing, LogConfig};

/// Endpoint used when neither `--url` nor `--ws` is given.
const URL_ENV: &str = "CHAINSTREAM_URL";

/// How long to wait for a cancelled stream to release its filter.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    name = "chainstream",
    about = "Follow and replay blocks, transactions and logs from a node",
    long_about = "
Follow and replay blocks, transactions and logs from a JSON-RPC node.
Output is one JSON object per line on stdout; logs go to stderr.

ENVIRONMENT VARIABLES:
  CHAINSTREAM_URL    HTTP endpoint used when --url and --ws are absent
  RUST_LOG           Overrides --log-level
",
    version
)]
struct Cli {
    #[command(flatten)]
    endpoint: Endpoint,

    /// Log level: trace | debug | info | warn | error
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// JSON logs on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct Endpoint {
    /// HTTP endpoint
    #[arg(long, global = true)]
    url: Option<String>,

    /// WebSocket endpoint (enables push)
    #[arg(long, global = true)]
    ws: Option<String>,

    /// Poll interval in milliseconds [default: 15000]
    #[arg(long, global = true)]
    interval_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the current block height
    Head,

    /// Follow new blocks
    Blocks {
        /// Start in history at this block (number, hex, earliest, latest)
        #[arg(long)]
        from: Option<BlockNumber>,
        /// Include full transaction objects
        #[arg(long)]
        full: bool,
        /// Stop after N items
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Follow pushed block headers (needs --ws)
    Heads {
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Follow transactions in new blocks
    Txs {
        #[arg(long)]
        from: Option<BlockNumber>,
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Follow pending transaction hashes
    Pending {
        /// Resolve hashes to full transactions
        #[arg(long)]
        full: bool,
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Follow logs matching --address / --topic
    Logs {
        #[command(flatten)]
        filter: LogFilter,
        #[arg(long)]
        limit: Option<u64>,
    },

    /// Replay blocks --from .. --to, then stop
    Replay {
        #[arg(long)]
        from: BlockNumber,
        /// Last block [default: latest]
        #[arg(long)]
        to: Option<BlockNumber>,
        #[arg(long)]
        full: bool,
        /// Replay newest first
        #[arg(long)]
        desc: bool,
        #[arg(long)]
        limit: Option<u64>,
    },
}

#[derive(Args, Debug)]
struct LogFilter {
    /// Log emitter address (repeatable)
    #[arg(long)]
    address: Vec<String>,

    /// Topic for the next position: a hash, `a,b` alternatives, or `any` (repeatable)
    #[arg(long)]
    topic: Vec<String>,

    /// Replay history from this block before following
    #[arg(long)]
    from: Option<BlockNumber>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&log_config(&cli));

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let streams = open(&cli.endpoint).await?;

    match cli.command {
        Commands::Head => {
            let head = streams.head_number().await?;
            println!("{head}");
            Ok(())
        }

        Commands::Blocks { from, full, limit } => {
            let handle = match from {
                Some(from) => streams.blocks_from(from, full).await?,
                None => streams.blocks(full).await?,
            };
            follow(handle, limit).await
        }

        Commands::Heads { limit } => {
            if !streams.client().supports_push() {
                bail!("heads needs a WebSocket endpoint (--ws)");
            }
            follow(streams.new_heads().await?, limit).await
        }

        Commands::Txs { from, limit } => {
            let handle = match from {
                Some(from) => streams.transactions_from(from).await?,
                None => streams.transactions().await?,
            };
            follow(handle, limit).await
        }

        Commands::Pending { full, limit } => {
            if full {
                follow(streams.pending_transactions().await?, limit).await
            } else {
                follow(streams.pending_transaction_hashes().await?, limit).await
            }
        }

        Commands::Logs { filter, limit } => {
            let criteria = criteria(&filter)?;
            let handle = if criteria.from_block != BlockNumber::Latest {
                streams.logs_from(criteria).await?
            } else {
                streams.logs(criteria).await?
            };
            follow(handle, limit).await
        }

        Commands::Replay {
            from,
            to,
            full,
            desc,
            limit,
        } => {
            let to = to.unwrap_or(BlockNumber::Latest);
            let handle = streams.replay_blocks(from, to, full, !desc).await?;
            follow(handle, limit).await
        }
    }
}

/// Connect to the endpoint named by the flags and wrap it in a facade.
async fn open(endpoint: &Endpoint) -> Result<ChainStreams> {
    let config = stream_config(endpoint);
    let client = match &endpoint.ws {
        Some(url) => {
            let ws = WsRpcClient::connect(url.clone(), WsClientConfig::default())
                .await
                .context("WebSocket connect failed")?;
            RpcClient::with_pubsub(Arc::new(ws))
        }
        None => {
            let url = endpoint
                .url
                .clone()
                .or_else(|| env::var(URL_ENV).ok())
                .ok_or_else(|| anyhow!("--url, --ws or {URL_ENV} is required"))?;
            RpcClient::new(Arc::new(HttpRpcClient::default_for(url)?))
        }
    };
    tracing::debug!(url = client.url(), push = client.supports_push(), "endpoint ready");
    Ok(ChainStreams::new(client, config))
}

fn stream_config(endpoint: &Endpoint) -> StreamConfig {
    let config = StreamConfig::default();
    match endpoint.interval_ms {
        Some(ms) => config.with_poll_interval(Duration::from_millis(ms)),
        None => config,
    }
}

fn log_config(cli: &Cli) -> LogConfig {
    LogConfig {
        level: cli.log_level.clone(),
        json: cli.log_json,
        ..LogConfig::default()
    }
}

fn criteria(filter: &LogFilter) -> Result<FilterCriteria> {
    let mut criteria = FilterCriteria::new().with_addresses(filter.address.iter().cloned());
    for topic in &filter.topic {
        criteria = criteria.with_topic(match topic.as_str() {
            "any" | "*" => TopicFilter::Any,
            _ => TopicFilter::one_of(topic.split(',')),
        });
    }
    if let Some(from) = filter.from {
        criteria = criteria.from_block(from);
    }
    criteria.validate().map_err(|e| anyhow!(e))?;
    Ok(criteria)
}

/// Print every item as a JSON line until the stream ends, `limit` data
/// items have been shown, or the user interrupts.
async fn follow<T>(mut handle: StreamHandle<T>, limit: Option<u64>) -> Result<()>
where
    T: ChainItem + Serialize,
{
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    let outcome = loop {
        tokio::select! {
            _ = &mut interrupt => {
                tracing::info!("interrupted");
                break Ok(());
            }
            item = handle.next() => match item {
                None | Some(Ok(StreamItem::End)) => break Ok(()),
                Some(Err(e)) => break Err(e).context("stream failed"),
                Some(Ok(StreamItem::Data(value))) => {
                    print_item("data", &value)?;
                    if limit.is_some_and(|n| handle.delivered() >= n) {
                        break Ok(());
                    }
                }
                Some(Ok(StreamItem::Removed(value))) => print_item("removed", &value)?,
            }
        }
    };

    shutdown(handle).await;
    outcome
}

/// Cancel and wait for the producer to finish releasing node resources.
async fn shutdown<T: ChainItem>(mut handle: StreamHandle<T>) {
    handle.cancel();
    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while handle.next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!("stream did not shut down in time");
    }
}

fn print_item<T: Serialize>(kind: &str, value: &T) -> Result<()> {
    println!("{}", json!({ "kind": kind, "item": value }));
    Ok(())
}
