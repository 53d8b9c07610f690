//! Gateway Relay Worker - Receiving Side
//!
//! The worker reads forwarded gateway payloads from a Redis stream consumer
//! group, translates dispatches into domain events and logs them through a
//! bus consumer.
//!
//! The group defaults to the worker name, so every worker reads the whole
//! stream in order.
//!
//! ## Configuration
//!
//! `config/relay.toml` (or the file named by `RELAY_CONFIG`), plus
//! environment variables:
//! - `REDIS_URL`: Redis connection string (overrides `[redis] url`)
//! - `RELAY_WORKER_NAME`: Unique worker identifier (default: hostname or UUID)
//! - `RUST_LOG`: Logging level (default: "info")

use deadpool_redis::{Config, Runtime};
use std::env;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gateway_relay::config::RelayConfig;
use gateway_relay::shutdown::ShutdownSignal;
use gateway_relay::transport::dlq::DeadLetterStream;
use gateway_relay::transport::redis::{default_consumer_name, RedisStreamSource};
use gateway_relay::{
    ClientBuilder, DispatchTranslator, EntityResolver, GatewayStrategy, LogConsumer, NoopResolver,
    RestResolver,
};

/// Get the worker name from environment, config, or generate one.
fn worker_name(config: &RelayConfig) -> String {
    env::var("RELAY_WORKER_NAME")
        .ok()
        .or_else(|| config.worker.name.clone())
        .unwrap_or_else(default_consumer_name)
}

fn build_resolver(config: &RelayConfig) -> Arc<dyn EntityResolver> {
    match config.rest.token() {
        Some(token) => {
            info!(base_url = %config.rest.base_url, "REST resolver enabled");
            Arc::new(
                RestResolver::new(&config.rest.base_url)
                    .with_token(token)
                    .with_timeout(config.rest.timeout()),
            )
        }
        None => {
            info!("No REST token configured, unresolvable channels stay unresolved");
            Arc::new(NoopResolver)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
    dotenvy::dotenv().ok();

    let config = RelayConfig::load()?;
    let worker_name = worker_name(&config);
    let group = config.worker.group(&worker_name);
    let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| config.redis.url.clone());

    info!(
        worker_name = %worker_name,
        consumer_group = %group,
        stream = %config.redis.stream,
        "Gateway relay worker starting"
    );

    let pool = Config::from_url(redis_url).create_pool(Some(Runtime::Tokio1))?;

    let dead_letters = DeadLetterStream::with_stream(pool.clone(), &config.redis.dlq_stream);
    let source = RedisStreamSource::new(pool, group, &worker_name)
        .with_stream(&config.redis.stream)
        .with_block(config.worker.block())
        .with_batch_size(config.worker.batch_size)
        .with_claim_idle(config.worker.claim_idle())
        .with_dead_letters(dead_letters);

    let strategy = GatewayStrategy::Receiving {
        source: Arc::new(source),
        translator: Arc::new(DispatchTranslator::with_defaults()),
        policy: config.receiving.policy()?,
    };

    let shutdown = ShutdownSignal::new();
    let client = ClientBuilder::new()
        .strategy(strategy)
        .bus_policy(config.bus.policy()?)
        .identify_options(config.gateway.identify_options()?)
        .resolver(build_resolver(&config))
        .shutdown_signal(shutdown.clone())
        .build(None)?;

    let bus = client.bus().clone();
    let mut consumer = bus.on(Arc::new(LogConsumer::new()));

    tokio::select! {
        _ = shutdown.wait() => {}
        _ = &mut consumer => {
            warn!("Event pipeline ended before shutdown");
        }
    }

    let stats = client.shutdown().await?;

    if !consumer.is_finished()
        && tokio::time::timeout(shutdown.timeout(), &mut consumer)
            .await
            .is_err()
    {
        warn!("Log consumer did not drain in time");
        consumer.abort();
    }

    info!(
        dispatches = stats.dispatches,
        events = stats.events,
        events_published = bus.events_published(),
        "Worker shut down gracefully"
    );

    Ok(())
}
