//! Gateway Relay - Forwarding Side
//!
//! Reads newline-delimited JSON gateway payloads from stdin, as piped by the
//! process that owns the gateway socket, and forwards every payload to the
//! Redis payload stream. Workers pick them up from there.
//!
//! ```text
//! gateway-socket | relay  ──XADD──>  gateway:payloads  ──>  worker(s)
//! ```
//!
//! Stops on EOF or SIGTERM/SIGINT.

use deadpool_redis::{Config, Runtime};
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use gateway_relay::config::RelayConfig;
use gateway_relay::shutdown::ShutdownSignal;
use gateway_relay::transport::redis::RedisStreamSink;
use gateway_relay::{ChannelConnection, ClientBuilder, ConnectionHandle, GatewayStrategy, RawPayload};

/// Deliver stdin payloads until EOF or shutdown. Returns lines delivered and
/// lines skipped.
async fn pipe_stdin(handle: ConnectionHandle, shutdown: ShutdownSignal) -> (u64, u64) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut delivered = 0;
    let mut skipped = 0;

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("End of input");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read stdin");
                break;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<RawPayload>(&line) {
            Ok(payload) => {
                debug!(op = ?payload.op, kind = ?payload.t, sequence = ?payload.s, "Payload received");
                handle.deliver(payload);
                delivered += 1;
            }
            Err(e) => {
                warn!(error = %e, "Skipping malformed payload line");
                skipped += 1;
            }
        }
    }

    handle.close();
    (delivered, skipped)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
    dotenvy::dotenv().ok();

    let config = RelayConfig::load()?;
    let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| config.redis.url.clone());

    info!(stream = %config.redis.stream, "Gateway relay starting");

    let pool = Config::from_url(redis_url).create_pool(Some(Runtime::Tokio1))?;
    let sink = RedisStreamSink::new(pool)
        .with_stream(&config.redis.stream)
        .with_max_len(config.redis.max_len);

    let (connection, handle) = ChannelConnection::new();

    let shutdown = ShutdownSignal::new();
    let client = ClientBuilder::new()
        .strategy(GatewayStrategy::forwarding(Arc::new(sink)))
        .identify_options(config.gateway.identify_options()?)
        .shutdown_signal(shutdown.clone())
        .build(Some(Arc::new(connection)))?;

    let signals = shutdown.clone();
    tokio::spawn(async move { signals.wait().await });

    let (delivered, skipped) = pipe_stdin(handle, shutdown.clone()).await;
    let stats = client.join().await?;

    info!(delivered, skipped, dispatches = stats.dispatches, "Gateway relay stopped");
    Ok(())
}
