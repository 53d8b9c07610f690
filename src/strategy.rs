//! Connection strategies.
//!
//! A [`GatewayStrategy`] decides where a client's dispatches come from and
//! how they become events:
//!
//! ```text
//! Strategy    | Dispatch source                       | Mapper
//! ------------|---------------------------------------|-----------
//! Standalone  | the live connection                   | translator
//! Forwarding  | none; raw payloads go to a sink       | discard
//! Receiving   | a payload source fed by a forwarder   | translator
//! ```
//!
//! Strategies keep no session state. Reconnects and resumes happen below
//! the connection and pass through untouched.
//!
//! # Example
//!
//! ```rust,ignore
//! use gateway_relay::strategy::GatewayStrategy;
//! use gateway_relay::transport::memory;
//! use std::sync::Arc;
//!
//! let (sink, source) = memory::channel(1024);
//!
//! // Process owning the socket
//! let forwarding = GatewayStrategy::forwarding(Arc::new(sink));
//!
//! // Process computing events
//! let receiving = GatewayStrategy::receiving(Arc::new(source));
//! ```

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::buffer::{BufferPolicy, OverflowBuffer, Push};
use crate::connection::{DispatchStream, GatewayConnection};
use crate::event::DomainEvent;
use crate::mediator::DispatchContext;
use crate::payload::{Dispatch, RawPayload};
use crate::shutdown::ShutdownSignal;
use crate::transport::{PayloadHandler, PayloadSink, PayloadSource, TransportError};
use crate::translator::DispatchTranslator;

/// Default backlog between a payload source and the pipeline
pub const DEFAULT_RECEIVING_CAPACITY: usize = 256;

/// Where dispatches come from, and whether they are translated.
#[derive(Clone)]
pub enum GatewayStrategy {
    /// Translate dispatches read from the live connection.
    Standalone { translator: Arc<DispatchTranslator> },

    /// Ship every raw payload to a sink and translate nothing.
    Forwarding { sink: Arc<dyn PayloadSink> },

    /// Translate dispatches read from a payload source. The backlog keeps
    /// the newest dispatches when the pipeline falls behind.
    Receiving {
        source: Arc<dyn PayloadSource>,
        translator: Arc<DispatchTranslator>,
        policy: BufferPolicy,
    },
}

/// Turns a dispatch into at most one event.
#[derive(Clone)]
pub enum EventMapper {
    Translate(Arc<DispatchTranslator>),
    Discard,
}

impl EventMapper {
    pub async fn map(&self, ctx: DispatchContext<'_>) -> Option<DomainEvent> {
        match self {
            Self::Translate(translator) => translator.translate(ctx).await,
            Self::Discard => None,
        }
    }
}

impl GatewayStrategy {
    /// Standalone with the built-in handlers.
    pub fn standalone() -> Self {
        Self::Standalone {
            translator: Arc::new(DispatchTranslator::with_defaults()),
        }
    }

    pub fn forwarding(sink: Arc<dyn PayloadSink>) -> Self {
        Self::Forwarding { sink }
    }

    /// Receiving with the built-in handlers and a latest-wins backlog of
    /// [`DEFAULT_RECEIVING_CAPACITY`].
    pub fn receiving(source: Arc<dyn PayloadSource>) -> Self {
        Self::Receiving {
            source,
            translator: Arc::new(DispatchTranslator::with_defaults()),
            policy: BufferPolicy::latest(DEFAULT_RECEIVING_CAPACITY),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Standalone { .. } => "standalone",
            Self::Forwarding { .. } => "forwarding",
            Self::Receiving { .. } => "receiving",
        }
    }

    /// Whether the strategy reads from a live connection.
    pub fn requires_connection(&self) -> bool {
        !matches!(self, Self::Receiving { .. })
    }

    /// Open the dispatch stream.
    ///
    /// Subscribes before returning, so payloads delivered afterwards are not
    /// missed. Spawned tasks stop, and the stream ends, on shutdown.
    pub fn dispatch_source(
        &self,
        connection: Option<&dyn GatewayConnection>,
        shutdown: &ShutdownSignal,
    ) -> DispatchStream {
        match self {
            Self::Standalone { .. } => {
                let Some(connection) = connection else {
                    warn!(strategy = self.name(), "No gateway connection, dispatch source is empty");
                    return stream::empty().boxed();
                };
                until_shutdown(connection.dispatch(), shutdown)
            }
            Self::Forwarding { sink } => {
                let Some(connection) = connection else {
                    warn!(strategy = self.name(), "No gateway connection, nothing to forward");
                    return stream::empty().boxed();
                };
                forward(connection, sink.clone(), shutdown)
            }
            Self::Receiving { source, policy, .. } => {
                if connection.is_some() {
                    debug!(strategy = self.name(), "Gateway connection ignored");
                }
                receive(source.clone(), *policy, shutdown)
            }
        }
    }

    pub fn event_mapper(&self) -> EventMapper {
        match self {
            Self::Standalone { translator } | Self::Receiving { translator, .. } => {
                EventMapper::Translate(translator.clone())
            }
            Self::Forwarding { .. } => EventMapper::Discard,
        }
    }
}

fn until_shutdown<S>(stream: S, shutdown: &ShutdownSignal) -> futures::stream::BoxStream<'static, S::Item>
where
    S: futures::Stream + Send + 'static,
    S::Item: Send + 'static,
{
    let signal = shutdown.clone();
    stream
        .take_until(async move { signal.cancelled().await })
        .boxed()
}

/// Spawn the forwarding task. The returned stream yields nothing and ends
/// when forwarding does.
fn forward(
    connection: &dyn GatewayConnection,
    sink: Arc<dyn PayloadSink>,
    shutdown: &ShutdownSignal,
) -> DispatchStream {
    let payloads = until_shutdown(connection.receiver(), shutdown);

    let task = tokio::spawn(async move {
        info!(sink = %sink.name(), "Forwarding payloads");
        let stats = sink.forward(payloads).await;
        info!(
            sink = %sink.name(),
            forwarded = stats.forwarded,
            dropped = stats.dropped,
            "Forwarding finished"
        );
    });

    stream::once(task)
        .filter_map(|result| async move {
            if let Err(e) = result {
                error!(error = %e, "Forwarding task failed");
            }
            None::<Dispatch>
        })
        .boxed()
}

/// Queues the dispatches a source delivers.
///
/// A dispatch the backlog cannot take is reported to the source as an error,
/// so sources with a dead-letter stream keep a copy of it.
struct DispatchBacklog {
    buffer: Arc<OverflowBuffer<Dispatch>>,
}

#[async_trait]
impl PayloadHandler for DispatchBacklog {
    async fn handle(&self, payload: RawPayload) -> Result<(), TransportError> {
        let op = payload.op;
        let Some(dispatch) = payload.into_dispatch() else {
            debug!(op = ?op, "Ignoring non-dispatch payload");
            return Ok(());
        };

        let kind = dispatch.kind.clone();
        match self.buffer.push(dispatch) {
            Push::Accepted => Ok(()),
            Push::Displaced(discarded) => {
                warn!(kind = %kind, discarded, "Dispatch backlog overflowed, keeping latest");
                Ok(())
            }
            Push::Rejected => {
                debug!(kind = %kind, "Dispatch backlog full, dispatch rejected");
                Err(TransportError::Full)
            }
            Push::Closed => {
                debug!(kind = %kind, "Dispatch backlog closed");
                Err(TransportError::Closed)
            }
        }
    }
}

/// Spawn the receiving task and drain its backlog.
fn receive(
    source: Arc<dyn PayloadSource>,
    policy: BufferPolicy,
    shutdown: &ShutdownSignal,
) -> DispatchStream {
    let buffer = Arc::new(OverflowBuffer::new(policy));
    let handler = DispatchBacklog {
        buffer: buffer.clone(),
    };
    let signal = shutdown.clone();

    tokio::spawn(async move {
        info!(source = %source.name(), "Receiving payloads");

        tokio::select! {
            result = source.receive(&handler) => match result {
                Ok(()) => info!(source = %source.name(), "Payload source ended"),
                Err(e) => error!(source = %source.name(), error = %e, "Payload source failed"),
            },
            _ = signal.cancelled() => {
                debug!(source = %source.name(), "Receiving stopped by shutdown");
            }
        }

        handler.buffer.close();
    });

    buffer.into_stream()
}
