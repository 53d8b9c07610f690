//! The live gateway connection, as seen by the routing layer.
//!
//! Handshake, heartbeating and reconnection live behind
//! [`GatewayConnection`]; this crate only reads the payloads it receives and
//! may queue payloads for sending.
//!
//! [`ChannelConnection`] is an in-process implementation: whoever owns the
//! socket (or a test) pushes payloads in through the [`ConnectionHandle`],
//! and every reader gets its own unbounded queue. Delivery never waits for
//! readers and never drops a payload a live reader has not seen; a slow
//! reader only grows its own queue.

use futures::stream::{self, BoxStream, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::payload::{Dispatch, RawPayload};

/// Stream of every payload received on a connection.
pub type PayloadStream = BoxStream<'static, RawPayload>;

/// Stream of the dispatches received on a connection.
pub type DispatchStream = BoxStream<'static, Dispatch>;

pub trait GatewayConnection: Send + Sync {
    /// Subscribe to all received payloads, in receipt order. Payloads
    /// received before the call are not replayed.
    fn receiver(&self) -> PayloadStream;

    /// Subscribe to received dispatches only.
    fn dispatch(&self) -> DispatchStream {
        self.receiver()
            .filter_map(|payload| futures::future::ready(payload.into_dispatch()))
            .boxed()
    }

    /// Queue payloads for sending on the connection.
    fn sender(&self) -> mpsc::UnboundedSender<RawPayload>;
}

/// Reader queues; `None` once the connection is closed.
#[derive(Default)]
struct Readers {
    queues: Mutex<Option<Vec<mpsc::UnboundedSender<RawPayload>>>>,
}

impl Readers {
    fn queues(&self) -> MutexGuard<'_, Option<Vec<mpsc::UnboundedSender<RawPayload>>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-process [`GatewayConnection`] with one queue per reader.
pub struct ChannelConnection {
    readers: Arc<Readers>,
    outbound: mpsc::UnboundedSender<RawPayload>,
}

/// Socket-owner side of a [`ChannelConnection`].
///
/// Dropping the handle closes the connection: every receiver stream ends
/// after yielding what it already queued.
pub struct ConnectionHandle {
    readers: Arc<Readers>,
    outbound: mpsc::UnboundedReceiver<RawPayload>,
}

impl ChannelConnection {
    pub fn new() -> (Self, ConnectionHandle) {
        let readers = Arc::new(Readers {
            queues: Mutex::new(Some(Vec::new())),
        });
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let connection = Self {
            readers: readers.clone(),
            outbound: outbound_tx,
        };
        let handle = ConnectionHandle {
            readers,
            outbound: outbound_rx,
        };
        (connection, handle)
    }
}

impl GatewayConnection for ChannelConnection {
    fn receiver(&self) -> PayloadStream {
        let mut queues = self.readers.queues();
        let Some(queues) = queues.as_mut() else {
            debug!("Subscribing to a closed connection");
            return stream::empty().boxed();
        };

        let (tx, rx) = mpsc::unbounded_channel();
        queues.push(tx);
        debug!(readers = queues.len(), "Connection reader attached");
        UnboundedReceiverStream::new(rx).boxed()
    }

    fn sender(&self) -> mpsc::UnboundedSender<RawPayload> {
        self.outbound.clone()
    }
}

impl ConnectionHandle {
    /// Deliver a received payload to every current reader.
    ///
    /// Returns the number of readers reached. Delivering with no readers is
    /// not an error; the payload is simply not observed. Readers whose
    /// stream was dropped are detached here.
    pub fn deliver(&self, payload: RawPayload) -> usize {
        let mut queues = self.readers.queues();
        let Some(queues) = queues.as_mut() else {
            return 0;
        };

        queues.retain(|queue| queue.send(payload.clone()).is_ok());
        queues.len()
    }

    /// Next payload queued for sending, or `None` once every sender is gone.
    pub async fn outbound(&mut self) -> Option<RawPayload> {
        self.outbound.recv().await
    }

    /// Close the connection. Existing receiver streams end.
    pub fn close(&self) {
        if self.readers.queues().take().is_some() {
            debug!("Connection closed");
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.close();
    }
}
