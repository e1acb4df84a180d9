//! Peer connection capability consumed by the transfer engines.
//!
//! A [`Transport`] owns one addressable [`Identity`], opens connections to
//! other identities and reports inbound ones. Each connection is reliable
//! and ordered: frames arrive in send order, followed by a single
//! [`LinkEvent::Closed`].
//!
//! [`memory`] provides an in-process implementation used by the demo app
//! and the test suites.

pub mod error;
pub mod memory;

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;

use printlink_protocol::{ConnectMetadata, Identity};

pub use error::TransportError;
pub use memory::{MemoryConnection, MemoryNetwork, MemoryTransport};

/// Event delivered on a connection, in send order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// One frame sent by the remote end.
    Data(Vec<u8>),
    /// The connection closed. No further events follow.
    Closed,
}

/// An open connection together with its inbound event stream.
pub struct Link<C> {
    pub connection: Arc<C>,
    pub events: mpsc::Receiver<LinkEvent>,
}

/// One end of an open connection.
///
/// `send` never blocks: frames queue inside the transport until the link
/// drains them, and [`buffered_amount`](Connection::buffered_amount)
/// reports how many queued bytes have not left yet.
pub trait Connection: Send + Sync + 'static {
    /// Identity of the remote end.
    fn peer(&self) -> &Identity;

    /// Metadata supplied by the side that opened the connection.
    fn metadata(&self) -> &ConnectMetadata;

    fn is_open(&self) -> bool;

    /// Queues one frame for delivery.
    fn send(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    /// Bytes queued by [`send`](Connection::send) and not yet delivered.
    fn buffered_amount(&self) -> usize;

    /// Closes both directions. Idempotent.
    fn close(&self);
}

/// Addressable endpoint able to open and accept connections.
pub trait Transport: Send + Sync + 'static {
    type Conn: Connection;

    fn identity(&self) -> &Identity;

    /// Opens a connection to `target`. Resolves once the remote end has
    /// accepted it; callers apply their own timeout.
    fn connect(
        &self,
        target: &Identity,
        metadata: ConnectMetadata,
    ) -> impl Future<Output = Result<Link<Self::Conn>, TransportError>> + Send;

    /// Takes the stream of inbound connections. Returns `None` after the
    /// first call.
    fn incoming(&self) -> Option<mpsc::Receiver<Link<Self::Conn>>>;
}
