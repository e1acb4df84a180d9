//! Per-customer file registry and the inbound message state machine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use printlink_protocol::{FileId, FileMeta, Identity, MessageKind, PeerMessage, encode};
use printlink_transfer::{Blob, Reassembly, TransferError};
use printlink_transport::Connection;

use crate::error::{ProtocolViolation, ReceiverError};
use crate::types::{CustomerSnapshot, ReceivedFile, ReceivedFileStatus};

struct FileSlot {
    id: Uuid,
    meta: FileMeta,
    status: ReceivedFileStatus,
    progress: u8,
    reassembly: Option<Reassembly>,
    blob: Option<Blob>,
}

impl FileSlot {
    fn new(meta: FileMeta) -> Self {
        Self {
            id: Uuid::new_v4(),
            meta,
            status: ReceivedFileStatus::Pending,
            progress: 0,
            reassembly: None,
            blob: None,
        }
    }

    fn bytes_received(&self) -> u64 {
        match (&self.blob, &self.reassembly) {
            (Some(blob), _) => blob.len() as u64,
            (None, Some(r)) => r.bytes_received(),
            (None, None) => 0,
        }
    }

    fn snapshot(&self) -> ReceivedFile {
        ReceivedFile {
            id: self.id,
            meta: self.meta.clone(),
            status: self.status,
            progress: self.progress,
            bytes_received: self.bytes_received(),
            blob: self.blob.clone(),
        }
    }

    fn is_in_flight(&self) -> bool {
        matches!(
            self.status,
            ReceivedFileStatus::Requested | ReceivedFileStatus::Transferring
        )
    }
}

struct Customer<C> {
    peer: Identity,
    label: String,
    files: Vec<FileSlot>,
    last_active: DateTime<Utc>,
    conn: Arc<C>,
    cancel: CancellationToken,
}

impl<C> Customer<C> {
    fn snapshot(&self) -> CustomerSnapshot {
        CustomerSnapshot {
            peer: self.peer.clone(),
            label: self.label.clone(),
            files: self.files.iter().map(FileSlot::snapshot).collect(),
            last_active: self.last_active,
        }
    }

    fn file_mut(&mut self, file_id: &FileId) -> Option<&mut FileSlot> {
        self.files.iter_mut().find(|f| &f.meta.id == file_id)
    }
}

/// Label shown for a customer: the name they supplied, or
/// `Device <short code>`.
pub fn customer_label(peer: &Identity, username: Option<&str>) -> String {
    match username.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => name.to_string(),
        None => format!("Device {}", peer.short_code()),
    }
}

/// Result of applying one inbound message.
#[derive(Debug, Clone)]
pub enum Applied {
    /// The file changed in a way worth reporting.
    Updated(ReceivedFile),
    /// The file finished; carries the customer label for the print queue.
    Completed { label: String, file: ReceivedFile },
    /// Accepted without a visible change.
    Unchanged,
}

/// Connected customers in connection order.
pub struct CustomerRegistry<C> {
    customers: Vec<Customer<C>>,
}

impl<C> Default for CustomerRegistry<C> {
    fn default() -> Self {
        Self {
            customers: Vec::new(),
        }
    }
}

impl<C: Connection> CustomerRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    pub fn snapshots(&self) -> Vec<CustomerSnapshot> {
        self.customers.iter().map(Customer::snapshot).collect()
    }

    pub fn snapshot(&self, peer: &Identity) -> Option<CustomerSnapshot> {
        self.get(peer).map(Customer::snapshot)
    }

    pub fn label(&self, peer: &Identity) -> Option<&str> {
        self.get(peer).map(|c| c.label.as_str())
    }

    fn get(&self, peer: &Identity) -> Option<&Customer<C>> {
        self.customers.iter().find(|c| &c.peer == peer)
    }

    fn get_mut(&mut self, peer: &Identity) -> Option<&mut Customer<C>> {
        self.customers.iter_mut().find(|c| &c.peer == peer)
    }

    fn current_mut(&mut self, peer: &Identity, conn: &Arc<C>) -> Result<&mut Customer<C>, ProtocolViolation> {
        let customer = self
            .get_mut(peer)
            .ok_or_else(|| ProtocolViolation::UnknownCustomer(peer.clone()))?;
        if !Arc::ptr_eq(&customer.conn, conn) {
            return Err(ProtocolViolation::StaleConnection);
        }
        Ok(customer)
    }

    /// Registers a new connection from `peer`.
    ///
    /// A peer that is already known keeps its position and its finished or
    /// idle files; files that were mid-request are dropped, since the new
    /// connection starts a fresh stream and will announce them again. The
    /// previous connection is cancelled and closed.
    pub fn upsert(&mut self, conn: Arc<C>, cancel: CancellationToken) -> CustomerSnapshot {
        let peer = conn.peer().clone();
        let label = customer_label(&peer, conn.metadata().username.as_deref());
        let now = Utc::now();

        if let Some(customer) = self.get_mut(&peer) {
            customer.cancel.cancel();
            customer.conn.close();
            let before = customer.files.len();
            customer.files.retain(|f| !f.is_in_flight());
            info!(
                peer = %peer,
                label = %label,
                dropped = before - customer.files.len(),
                "Customer reconnected"
            );
            customer.label = label;
            customer.conn = conn;
            customer.cancel = cancel;
            customer.last_active = now;
            return customer.snapshot();
        }

        info!(peer = %peer, label = %label, "Customer connected");
        let customer = Customer {
            peer,
            label,
            files: Vec::new(),
            last_active: now,
            conn,
            cancel,
        };
        let snapshot = customer.snapshot();
        self.customers.push(customer);
        snapshot
    }

    /// Removes `peer` if `conn` is still its current connection.
    pub fn remove_if_current(&mut self, peer: &Identity, conn: &Arc<C>) -> bool {
        let Some(index) = self
            .customers
            .iter()
            .position(|c| &c.peer == peer && Arc::ptr_eq(&c.conn, conn))
        else {
            return false;
        };
        let customer = self.customers.remove(index);
        customer.cancel.cancel();
        info!(peer = %peer, files = customer.files.len(), "Customer removed");
        true
    }

    /// Closes and removes `peer` regardless of which connection it is on.
    pub fn close(&mut self, peer: &Identity) -> bool {
        let Some(index) = self.customers.iter().position(|c| &c.peer == peer) else {
            return false;
        };
        let customer = self.customers.remove(index);
        customer.cancel.cancel();
        customer.conn.close();
        info!(peer = %peer, "Customer closed by admin");
        true
    }

    /// Closes every connection. Returns the removed customers in
    /// connection order.
    pub fn close_all(&mut self) -> Vec<Identity> {
        self.customers
            .drain(..)
            .map(|customer| {
                customer.cancel.cancel();
                customer.conn.close();
                customer.peer
            })
            .collect()
    }

    /// Applies one message received from `peer` on `conn`.
    ///
    /// Messages are matched to files strictly by file id. Anything that
    /// does not fit the file's state is returned as a violation and leaves
    /// the registry untouched.
    pub fn apply(
        &mut self,
        peer: &Identity,
        conn: &Arc<C>,
        message: PeerMessage,
    ) -> Result<Applied, ProtocolViolation> {
        let customer = self.current_mut(peer, conn)?;
        customer.last_active = Utc::now();
        let kind = message.kind();

        match message {
            PeerMessage::Meta(meta) => {
                if customer.files.iter().any(|f| f.meta.id == meta.id) {
                    debug!(peer = %peer, file_id = %meta.id, "Duplicate file announcement");
                    return Ok(Applied::Unchanged);
                }
                debug!(
                    peer = %peer,
                    file_id = %meta.id,
                    name = %meta.name,
                    bytes = meta.size,
                    "File announced"
                );
                let slot = FileSlot::new(meta);
                let snapshot = slot.snapshot();
                customer.files.push(slot);
                Ok(Applied::Updated(snapshot))
            }

            PeerMessage::Chunk { file_id, data } => {
                if let Some(active) = customer.files.iter().find(|f| {
                    f.status == ReceivedFileStatus::Transferring && f.meta.id != file_id
                }) {
                    return Err(ProtocolViolation::ConcurrentTransfer {
                        file_id,
                        active: active.meta.id.clone(),
                    });
                }
                let file = customer
                    .file_mut(&file_id)
                    .ok_or_else(|| ProtocolViolation::UnknownFile {
                        kind,
                        file_id: file_id.clone(),
                    })?;
                if !file.is_in_flight() {
                    return Err(ProtocolViolation::UnexpectedStatus {
                        kind,
                        file_id,
                        status: file.status,
                    });
                }

                let started = file.status == ReceivedFileStatus::Requested;
                file.status = ReceivedFileStatus::Transferring;
                let size = file.meta.size;
                let reassembly = file.reassembly.get_or_insert_with(|| Reassembly::new(size));
                reassembly.push(&data);
                let progress = reassembly.percent();
                let changed = progress > file.progress;
                if changed {
                    file.progress = progress;
                }

                if started {
                    debug!(peer = %peer, file_id = %file_id, "Transfer started");
                }
                if started || changed {
                    Ok(Applied::Updated(file.snapshot()))
                } else {
                    Ok(Applied::Unchanged)
                }
            }

            PeerMessage::End { file_id } => {
                let label = customer.label.clone();
                let file = customer
                    .file_mut(&file_id)
                    .ok_or_else(|| ProtocolViolation::UnknownFile {
                        kind,
                        file_id: file_id.clone(),
                    })?;
                if !file.is_in_flight() {
                    return Err(ProtocolViolation::UnexpectedStatus {
                        kind,
                        file_id,
                        status: file.status,
                    });
                }

                let reassembly = file
                    .reassembly
                    .take()
                    .unwrap_or_else(|| Reassembly::new(file.meta.size));
                let blob = reassembly.finish(file.meta.mime_type.clone());
                if !blob.size_matches() {
                    warn!(
                        peer = %peer,
                        file_id = %file_id,
                        declared = file.meta.size,
                        received = blob.len(),
                        "Received size differs from announced size"
                    );
                }
                info!(
                    peer = %peer,
                    file_id = %file_id,
                    name = %file.meta.name,
                    bytes = blob.len(),
                    checksum = %blob.checksum(),
                    "File received"
                );
                file.blob = Some(blob);
                file.status = ReceivedFileStatus::Complete;
                file.progress = 100;
                Ok(Applied::Completed {
                    label,
                    file: file.snapshot(),
                })
            }

            PeerMessage::DenyDownload { file_id } => {
                let file = customer
                    .file_mut(&file_id)
                    .ok_or_else(|| ProtocolViolation::UnknownFile {
                        kind,
                        file_id: file_id.clone(),
                    })?;
                if !matches!(
                    file.status,
                    ReceivedFileStatus::Pending | ReceivedFileStatus::Requested
                ) {
                    return Err(ProtocolViolation::UnexpectedStatus {
                        kind,
                        file_id,
                        status: file.status,
                    });
                }
                info!(peer = %peer, file_id = %file_id, "Download denied by customer");
                file.status = ReceivedFileStatus::Denied;
                file.reassembly = None;
                Ok(Applied::Updated(file.snapshot()))
            }

            PeerMessage::RequestDownload { .. } => Err(ProtocolViolation::WrongDirection {
                kind: MessageKind::RequestDownload,
            }),
        }
    }

    /// Asks `peer` for the content of `file_id` and marks it requested.
    pub fn request_download(
        &mut self,
        peer: &Identity,
        file_id: &FileId,
    ) -> Result<ReceivedFile, ReceiverError> {
        let customer = self
            .get_mut(peer)
            .ok_or_else(|| ReceiverError::UnknownCustomer(peer.clone()))?;
        let conn = customer.conn.clone();
        let file = customer
            .file_mut(file_id)
            .ok_or_else(|| ReceiverError::UnknownFile {
                peer: peer.clone(),
                file_id: file_id.clone(),
            })?;
        if !file.status.is_requestable() {
            return Err(ReceiverError::NotRequestable {
                file_id: file_id.clone(),
                status: file.status,
            });
        }

        let frame = encode(&PeerMessage::RequestDownload {
            file_id: file_id.clone(),
        })
        .map_err(TransferError::from)?;
        conn.send(frame).map_err(TransferError::from)?;

        file.status = ReceivedFileStatus::Requested;
        file.progress = 0;
        file.reassembly = Some(Reassembly::new(file.meta.size));
        info!(peer = %peer, file_id = %file_id, name = %file.meta.name, "Download requested");
        Ok(file.snapshot())
    }

    /// Ids of `peer`'s files currently `Pending`, in announcement order.
    pub fn pending_files(&self, peer: &Identity) -> Result<Vec<FileId>, ReceiverError> {
        let customer = self
            .get(peer)
            .ok_or_else(|| ReceiverError::UnknownCustomer(peer.clone()))?;
        Ok(customer
            .files
            .iter()
            .filter(|f| f.status == ReceivedFileStatus::Pending)
            .map(|f| f.meta.id.clone())
            .collect())
    }

    /// Requests every `Pending` file of `peer`. A file whose request fails
    /// is logged and left `Pending`; the others are still requested.
    pub fn request_pending(&mut self, peer: &Identity) -> Result<Vec<ReceivedFile>, ReceiverError> {
        let pending = self.pending_files(peer)?;
        let mut requested = Vec::with_capacity(pending.len());
        for file_id in pending {
            match self.request_download(peer, &file_id) {
                Ok(file) => requested.push(file),
                Err(e) => warn!(peer = %peer, file_id = %file_id, error = %e, "Failed to request file"),
            }
        }
        Ok(requested)
    }

    /// The completed content of one file, if any.
    pub fn blob(&self, peer: &Identity, file_id: &FileId) -> Option<(FileMeta, Blob)> {
        let file = self.get(peer)?.files.iter().find(|f| &f.meta.id == file_id)?;
        Some((file.meta.clone(), file.blob.clone()?))
    }
}
