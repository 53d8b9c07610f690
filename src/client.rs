//! Client assembly.
//!
//! [`ClientBuilder`] wires a strategy, a bus, a cache, a resolver and the
//! session state into a running [`GatewayClient`]:
//!
//! ```text
//! strategy.dispatch_source() -> mapper.map(ctx) -> bus.publish()
//!                                    |
//!                              TranslationScope (cache, resolver, shard)
//! ```
//!
//! Two tasks are spawned: the pipeline, which handles one dispatch at a time
//! so events keep the order of their dispatches, and the session owner,
//! which applies [`SessionUpdate`]s sent by the connection layer.
//!
//! # Example
//!
//! ```rust,ignore
//! use gateway_relay::{ClientBuilder, GatewayStrategy};
//!
//! let client = ClientBuilder::new()
//!     .strategy(GatewayStrategy::standalone())
//!     .build(Some(connection))?;
//!
//! let mut events = client.bus().subscribe();
//! ```

use futures::StreamExt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::buffer::BufferPolicy;
use crate::bus::EventBus;
use crate::cache::EntityCache;
use crate::connection::{DispatchStream, GatewayConnection};
use crate::mediator::Mediator;
use crate::resolver::{EntityResolver, NoopResolver};
use crate::session::{IdentifyOptions, SessionState, SessionUpdate, ShardInfo};
use crate::shutdown::ShutdownSignal;
use crate::strategy::{EventMapper, GatewayStrategy};

/// Errors from building or tearing down a client.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("{strategy} strategy requires a gateway connection")]
    MissingConnection { strategy: &'static str },

    #[error("client task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Totals reported by the pipeline when it ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub dispatches: u64,
    pub events: u64,
}

pub struct ClientBuilder {
    strategy: GatewayStrategy,
    bus_policy: BufferPolicy,
    identify: IdentifyOptions,
    resolver: Arc<dyn EntityResolver>,
    cache: Option<Arc<EntityCache>>,
    shutdown: Option<ShutdownSignal>,
}

impl ClientBuilder {
    /// Standalone strategy, unbounded bus, no REST access.
    pub fn new() -> Self {
        Self {
            strategy: GatewayStrategy::standalone(),
            bus_policy: BufferPolicy::unbounded(),
            identify: IdentifyOptions::new(),
            resolver: Arc::new(NoopResolver),
            cache: None,
            shutdown: None,
        }
    }

    pub fn strategy(mut self, strategy: GatewayStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Buffering of each bus subscription
    pub fn bus_policy(mut self, policy: BufferPolicy) -> Self {
        self.bus_policy = policy;
        self
    }

    pub fn identify_options(mut self, options: IdentifyOptions) -> Self {
        self.identify = options;
        self
    }

    pub fn shard(mut self, shard: ShardInfo) -> Self {
        self.identify.shard = Some(shard);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn EntityResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Share a cache between clients (e.g. one per shard)
    pub fn cache(mut self, cache: Arc<EntityCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Stop the client together with other components
    pub fn shutdown_signal(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Start the client. Must be called within a tokio runtime.
    pub fn build(
        self,
        connection: Option<Arc<dyn GatewayConnection>>,
    ) -> Result<GatewayClient, ClientError> {
        let strategy_name = self.strategy.name();
        if self.strategy.requires_connection() && connection.is_none() {
            return Err(ClientError::MissingConnection {
                strategy: strategy_name,
            });
        }

        let shutdown = self.shutdown.unwrap_or_default();
        let bus = EventBus::with_policy(self.bus_policy);
        let cache = self.cache.unwrap_or_default();

        let session = SessionState::new(self.identify);
        let mediator = Arc::new(Mediator::new(
            connection.clone(),
            self.resolver,
            cache,
            bus,
            session.watch(),
        ));

        let (session_tx, session_rx) = mpsc::unbounded_channel();
        let session_task = tokio::spawn(run_session(session, session_rx, shutdown.clone()));

        let source = self
            .strategy
            .dispatch_source(connection.as_deref(), &shutdown);
        let mapper = self.strategy.event_mapper();
        let pipeline = tokio::spawn(run_pipeline(source, mapper, mediator.clone()));

        info!(
            strategy = strategy_name,
            shard = ?mediator.shard().map(|s| s.as_pair()),
            bus_capacity = ?mediator.bus().policy().capacity(),
            "Gateway client started"
        );

        Ok(GatewayClient {
            mediator,
            strategy_name,
            shutdown,
            session: session_tx,
            session_task,
            pipeline,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive dispatches through the mapper onto the bus until the source ends.
async fn run_pipeline(
    mut source: DispatchStream,
    mapper: EventMapper,
    mediator: Arc<Mediator>,
) -> PipelineStats {
    let mut stats = PipelineStats::default();

    while let Some(dispatch) = source.next().await {
        stats.dispatches += 1;
        let kind = dispatch.kind.clone();

        match mapper.map(mediator.context(dispatch)).await {
            Some(event) => {
                stats.events += 1;
                let receivers = mediator.bus().publish(event);
                debug!(kind = %kind, receivers, "Dispatch published");
            }
            None => debug!(kind = %kind, "Dispatch produced no event"),
        }
    }

    mediator.bus().complete();
    info!(
        dispatches = stats.dispatches,
        events = stats.events,
        "Pipeline finished"
    );
    stats
}

/// Sole writer of the session's identify options.
async fn run_session(
    mut session: SessionState,
    mut updates: mpsc::UnboundedReceiver<SessionUpdate>,
    shutdown: ShutdownSignal,
) {
    loop {
        let update = tokio::select! {
            update = updates.recv() => match update {
                Some(update) => update,
                None => break,
            },
            _ = shutdown.cancelled() => break,
        };

        if let Err(e) = session.apply(update) {
            warn!(error = %e, state = ?session.state(), "Rejected session update");
        }
    }
    debug!(state = ?session.state(), "Session owner stopped");
}

/// A running client.
pub struct GatewayClient {
    mediator: Arc<Mediator>,
    strategy_name: &'static str,
    shutdown: ShutdownSignal,
    session: mpsc::UnboundedSender<SessionUpdate>,
    session_task: JoinHandle<()>,
    pipeline: JoinHandle<PipelineStats>,
}

impl GatewayClient {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy_name
    }

    pub fn bus(&self) -> &EventBus {
        self.mediator.bus()
    }

    pub fn cache(&self) -> &Arc<EntityCache> {
        self.mediator.cache()
    }

    pub fn mediator(&self) -> &Arc<Mediator> {
        &self.mediator
    }

    /// Channel for the connection layer's lifecycle messages.
    pub fn session_updates(&self) -> mpsc::UnboundedSender<SessionUpdate> {
        self.session.clone()
    }

    /// Latest identify options, as the next handshake would use them.
    pub fn identify_options(&self) -> IdentifyOptions {
        self.mediator.identify_options()
    }

    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Wait for the dispatch source to end on its own, then stop.
    pub async fn join(self) -> Result<PipelineStats, ClientError> {
        let stats = self.pipeline.await?;
        self.shutdown.trigger();
        self.session_task.await?;
        Ok(stats)
    }

    /// Stop spawned tasks and complete the bus. Subscribers drain what they
    /// already received, then end.
    pub async fn shutdown(self) -> Result<PipelineStats, ClientError> {
        info!(strategy = self.strategy_name, "Shutting down gateway client");
        self.shutdown.trigger();
        let stats = self.pipeline.await?;
        self.session_task.await?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ChannelConnection;
    use crate::payload::RawPayload;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_build_requires_connection() {
        let result = ClientBuilder::new().build(None);
        assert!(matches!(
            result,
            Err(ClientError::MissingConnection {
                strategy: "standalone"
            })
        ));
    }

    #[tokio::test]
    async fn test_standalone_pipeline_publishes_events() {
        let (connection, handle) = ChannelConnection::new();
        let client = ClientBuilder::new().build(Some(Arc::new(connection))).unwrap();
        let mut events = client.bus().subscribe();

        handle.deliver(RawPayload::dispatch(
            "CHANNEL_CREATE",
            1,
            json!({"id": "10", "type": 0, "guild_id": "1"}),
        ));

        let event = timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("timeout")
            .unwrap();
        assert_eq!(event.guild_id().map(|g| g.get()), Some(1));

        let stats = client.shutdown().await.unwrap();
        assert_eq!(stats.events, 1);
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn test_session_updates_reach_mediator() {
        let (connection, _handle) = ChannelConnection::new();
        let client = ClientBuilder::new().build(Some(Arc::new(connection))).unwrap();

        let updates = client.session_updates();
        updates.send(SessionUpdate::Identifying).unwrap();
        updates
            .send(SessionUpdate::Ready {
                session_id: "abc".to_string(),
            })
            .unwrap();
        updates.send(SessionUpdate::Sequence(5)).unwrap();

        let mut resume = None;
        for _ in 0..100 {
            resume = client.identify_options().resume;
            if resume.as_ref().map(|r| r.sequence) == Some(5) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(resume.unwrap().session_id, "abc");

        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_join_after_connection_closes() {
        let (connection, handle) = ChannelConnection::new();
        let client = ClientBuilder::new().build(Some(Arc::new(connection))).unwrap();
        drop(handle);

        let stats = timeout(Duration::from_secs(1), client.join())
            .await
            .expect("timeout")
            .unwrap();
        assert_eq!(stats, PipelineStats::default());
    }
}
