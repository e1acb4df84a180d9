//! In-process transport: every bound identity lives in one shared
//! [`MemoryNetwork`] and connections are pairs of queues pumped by tasks.
//!
//! Each direction has an unbounded outbound queue (so `send` never blocks)
//! and a bounded delivery channel into the remote end. A slow consumer
//! therefore backs frames up in the outbound queue, which is what
//! `buffered_amount` reports.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use printlink_protocol::{ConnectMetadata, Identity, generate_short_id};

use crate::{Connection, Link, LinkEvent, Transport, TransportError};

/// Frames the remote end may hold undelivered before the pump waits.
pub const DEFAULT_DELIVERY_CAPACITY: usize = 16;

const ACCEPT_BACKLOG: usize = 16;

#[derive(Clone)]
enum Endpoint {
    Listening(mpsc::Sender<Link<MemoryConnection>>),
    /// Accepts nothing; connection attempts never resolve.
    Unresponsive,
}

/// Shared registry of bound identities.
#[derive(Clone)]
pub struct MemoryNetwork {
    endpoints: Arc<Mutex<HashMap<Identity, Endpoint>>>,
    delivery_capacity: usize,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::with_delivery_capacity(DEFAULT_DELIVERY_CAPACITY)
    }

    /// Creates a network whose links deliver at most `frames` frames ahead
    /// of the consumer.
    pub fn with_delivery_capacity(frames: usize) -> Self {
        Self {
            endpoints: Arc::new(Mutex::new(HashMap::new())),
            delivery_capacity: frames.max(1),
        }
    }

    /// Binds `identity` and returns its transport.
    pub fn bind(&self, identity: Identity) -> Result<MemoryTransport, TransportError> {
        let (tx, rx) = mpsc::channel(ACCEPT_BACKLOG);
        {
            let mut endpoints = self.lock();
            if endpoints.contains_key(&identity) {
                return Err(TransportError::IdentityTaken(identity));
            }
            endpoints.insert(identity.clone(), Endpoint::Listening(tx));
        }
        debug!(%identity, "Bound memory transport");
        Ok(MemoryTransport {
            identity,
            network: self.clone(),
            incoming: Mutex::new(Some(rx)),
        })
    }

    /// Binds a freshly generated identity, as a browser peer does when it
    /// opens without a fixed id.
    pub fn bind_ephemeral(&self) -> MemoryTransport {
        loop {
            let identity = Identity::new(format!("PEER-{}", generate_short_id()));
            if let Ok(transport) = self.bind(identity) {
                return transport;
            }
        }
    }

    /// Reserves `identity` as a peer that never answers.
    pub fn bind_unresponsive(&self, identity: Identity) -> Result<(), TransportError> {
        let mut endpoints = self.lock();
        if endpoints.contains_key(&identity) {
            return Err(TransportError::IdentityTaken(identity));
        }
        endpoints.insert(identity, Endpoint::Unresponsive);
        Ok(())
    }

    fn endpoint(&self, identity: &Identity) -> Option<Endpoint> {
        self.lock().get(identity).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Identity, Endpoint>> {
        self.endpoints.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One bound identity on a [`MemoryNetwork`].
pub struct MemoryTransport {
    identity: Identity,
    network: MemoryNetwork,
    incoming: Mutex<Option<mpsc::Receiver<Link<MemoryConnection>>>>,
}

impl Transport for MemoryTransport {
    type Conn = MemoryConnection;

    fn identity(&self) -> &Identity {
        &self.identity
    }

    fn connect(
        &self,
        target: &Identity,
        metadata: ConnectMetadata,
    ) -> impl Future<Output = Result<Link<MemoryConnection>, TransportError>> + Send {
        let local = self.identity.clone();
        let target = target.clone();
        let network = self.network.clone();

        async move {
            let accept = match network.endpoint(&target) {
                Some(Endpoint::Listening(accept)) => accept,
                Some(Endpoint::Unresponsive) => {
                    std::future::pending::<()>().await;
                    return Err(TransportError::Unreachable(target));
                }
                None => return Err(TransportError::Unreachable(target)),
            };

            let (ours, theirs) = link_pair(
                local.clone(),
                target.clone(),
                metadata,
                network.delivery_capacity,
            );
            accept
                .send(theirs)
                .await
                .map_err(|_| TransportError::Unreachable(target.clone()))?;
            debug!(from = %local, to = %target, "Memory link opened");
            Ok(ours)
        }
    }

    fn incoming(&self) -> Option<mpsc::Receiver<Link<MemoryConnection>>> {
        self.incoming
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

/// One end of an in-memory link.
#[derive(Debug)]
pub struct MemoryConnection {
    peer: Identity,
    metadata: ConnectMetadata,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    buffered: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl Connection for MemoryConnection {
    fn peer(&self) -> &Identity {
        &self.peer
    }

    fn metadata(&self) -> &ConnectMetadata {
        &self.metadata
    }

    fn is_open(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    fn send(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let len = frame.len();
        self.buffered.fetch_add(len, Ordering::AcqRel);
        if self.outbound.send(frame).is_err() {
            self.buffered.fetch_sub(len, Ordering::AcqRel);
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn link_pair(
    opener: Identity,
    acceptor: Identity,
    metadata: ConnectMetadata,
    capacity: usize,
) -> (Link<MemoryConnection>, Link<MemoryConnection>) {
    let cancel = CancellationToken::new();

    let (opener_out, opener_out_rx) = mpsc::unbounded_channel();
    let (acceptor_out, acceptor_out_rx) = mpsc::unbounded_channel();
    let (opener_events_tx, opener_events) = mpsc::channel(capacity);
    let (acceptor_events_tx, acceptor_events) = mpsc::channel(capacity);
    let opener_buffered = Arc::new(AtomicUsize::new(0));
    let acceptor_buffered = Arc::new(AtomicUsize::new(0));

    tokio::spawn(pump(
        opener_out_rx,
        acceptor_events_tx,
        opener_buffered.clone(),
        cancel.clone(),
    ));
    tokio::spawn(pump(
        acceptor_out_rx,
        opener_events_tx,
        acceptor_buffered.clone(),
        cancel.clone(),
    ));

    let opener_link = Link {
        connection: Arc::new(MemoryConnection {
            peer: acceptor,
            metadata: metadata.clone(),
            outbound: opener_out,
            buffered: opener_buffered,
            cancel: cancel.clone(),
        }),
        events: opener_events,
    };
    let acceptor_link = Link {
        connection: Arc::new(MemoryConnection {
            peer: opener,
            metadata,
            outbound: acceptor_out,
            buffered: acceptor_buffered,
            cancel,
        }),
        events: acceptor_events,
    };
    (opener_link, acceptor_link)
}

/// Moves frames from one end's outbound queue to the other end's events,
/// then reports `Closed` once the link is cancelled.
async fn pump(
    mut frames: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::Sender<LinkEvent>,
    buffered: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let len = frame.len();
        let delivered = tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            sent = events.send(LinkEvent::Data(frame)) => sent.is_ok(),
        };
        buffered.fetch_sub(len, Ordering::AcqRel);
        if !delivered {
            break;
        }
        trace!(len, "Frame delivered");
    }

    cancel.cancel();
    let _ = events.send(LinkEvent::Closed).await;
}
