//! Admin-side engine: accepts customer connections, tracks their files
//! and drives the request, print and export actions.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use printlink_export::{Archive, ExportEntry, build_archive};
use printlink_protocol::{FileId, Identity, decode};
use printlink_transfer::ApprovalQueue;
use printlink_transport::{Connection, Link, LinkEvent, Transport};

use crate::error::ReceiverError;
use crate::print::{PrintJob, PrintSink};
use crate::registry::{Applied, CustomerRegistry};
use crate::types::{
    CustomerSnapshot, FileTarget, PrintRequest, ReceivedFile, ReceivedFileStatus, ReceiverConfig,
    ReceiverEvent,
};

const EVENT_CAPACITY: usize = 256;

/// What [`ReceiverEngine::request_print`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintAction {
    /// The file was already complete and went straight to the printer.
    Printed,
    /// The file was requested; it joins the print queue once it arrives.
    Requested,
}

struct State<C> {
    registry: CustomerRegistry<C>,
    prints: ApprovalQueue<PrintRequest>,
}

impl<C> State<C> {
    fn print_snapshot(&self) -> Vec<PrintRequest> {
        self.prints.iter().cloned().collect()
    }
}

struct Inner<T: Transport> {
    transport: T,
    sink: Arc<dyn PrintSink>,
    config: ReceiverConfig,
    state: Mutex<State<T::Conn>>,
    events_tx: mpsc::Sender<ReceiverEvent>,
    shutdown: CancellationToken,
}

/// Receiver (admin) transfer engine.
pub struct ReceiverEngine<T: Transport> {
    inner: Arc<Inner<T>>,
    events_rx: Mutex<Option<mpsc::Receiver<ReceiverEvent>>>,
}

impl<T: Transport> ReceiverEngine<T> {
    /// Creates an engine listening on `transport`, whose identity should be
    /// the admin's persisted one (see
    /// [`load_or_create_identity`](crate::load_or_create_identity)).
    pub fn new(transport: T, sink: Arc<dyn PrintSink>, config: ReceiverConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                transport,
                sink,
                config,
                state: Mutex::new(State {
                    registry: CustomerRegistry::new(),
                    prints: ApprovalQueue::new(),
                }),
                events_tx,
                shutdown: CancellationToken::new(),
            }),
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Starts accepting customer connections.
    pub fn start(&self) -> Result<(), ReceiverError> {
        let incoming = self
            .inner
            .transport
            .incoming()
            .ok_or(ReceiverError::AlreadyStarted)?;
        info!(identity = %self.identity(), "Receiver listening");
        tokio::spawn(accept_loop(self.inner.clone(), incoming));
        Ok(())
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<ReceiverEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    pub fn identity(&self) -> &Identity {
        self.inner.transport.identity()
    }

    /// Connected customers in connection order.
    pub fn customers(&self) -> Vec<CustomerSnapshot> {
        self.inner.lock().registry.snapshots()
    }

    pub fn customer(&self, peer: &Identity) -> Option<CustomerSnapshot> {
        self.inner.lock().registry.snapshot(peer)
    }

    /// Completed files awaiting a print decision, oldest first.
    pub fn pending_prints(&self) -> Vec<PrintRequest> {
        self.inner.lock().print_snapshot()
    }

    /// Asks the customer for a `Pending` or `Denied` file.
    pub fn request_download(&self, peer: &Identity, file_id: &FileId) -> Result<ReceivedFile, ReceiverError> {
        let file = self.inner.lock().registry.request_download(peer, file_id)?;
        self.inner.emit(ReceiverEvent::FileUpdated {
            peer: peer.clone(),
            file: file.clone(),
        });
        Ok(file)
    }

    /// Requests every `Pending` file of `peer`. Returns the ids actually
    /// requested; files whose request failed stay `Pending`.
    pub fn request_all(&self, peer: &Identity) -> Result<Vec<FileId>, ReceiverError> {
        let files = self.inner.lock().registry.request_pending(peer)?;
        let mut requested = Vec::with_capacity(files.len());
        for file in files {
            requested.push(file.file_id().clone());
            self.inner.emit(ReceiverEvent::FileUpdated {
                peer: peer.clone(),
                file,
            });
        }
        debug!(peer = %peer, files = requested.len(), "Requested all pending files");
        Ok(requested)
    }

    /// Prints a file now if it is complete, otherwise requests it.
    pub async fn request_print(&self, peer: &Identity, file_id: &FileId) -> Result<PrintAction, ReceiverError> {
        let job = {
            let state = self.inner.lock();
            let customer = state
                .registry
                .snapshot(peer)
                .ok_or_else(|| ReceiverError::UnknownCustomer(peer.clone()))?;
            let file = customer.file(file_id).ok_or_else(|| ReceiverError::UnknownFile {
                peer: peer.clone(),
                file_id: file_id.clone(),
            })?;
            file.blob.as_ref().map(|blob| PrintJob {
                customer_label: customer.label.clone(),
                file_name: file.meta.name.clone(),
                mime_type: blob.mime_type().to_string(),
                bytes: blob.bytes().clone(),
            })
        };

        match job {
            Some(job) => {
                self.inner.print(job).await?;
                let target = FileTarget {
                    peer: peer.clone(),
                    file_id: file_id.clone(),
                };
                self.inner.remove_print(&target);
                self.inner.emit(ReceiverEvent::Printed(target));
                Ok(PrintAction::Printed)
            }
            None => {
                self.request_download(peer, file_id)?;
                Ok(PrintAction::Requested)
            }
        }
    }

    /// Sends a queued file to the printer and drops it from the queue.
    pub async fn approve_print(&self, target: &FileTarget) -> Result<(), ReceiverError> {
        let job = {
            let state = self.inner.lock();
            let request = state
                .prints
                .iter()
                .find(|r| &r.target == target)
                .cloned()
                .ok_or_else(|| ReceiverError::NoPrintRequest(target.file_id.clone()))?;
            let (meta, blob) = state
                .registry
                .blob(&target.peer, &target.file_id)
                .ok_or_else(|| ReceiverError::UnknownFile {
                    peer: target.peer.clone(),
                    file_id: target.file_id.clone(),
                })?;
            PrintJob {
                customer_label: request.customer_label,
                file_name: meta.name,
                mime_type: blob.mime_type().to_string(),
                bytes: blob.bytes().clone(),
            }
        };

        self.inner.print(job).await?;
        self.inner.remove_print(target);
        self.inner.emit(ReceiverEvent::Printed(target.clone()));
        Ok(())
    }

    /// Approves the oldest queued print. Returns `None` when the queue is
    /// empty.
    pub async fn approve_next_print(&self) -> Result<Option<FileTarget>, ReceiverError> {
        let Some(target) = self.inner.lock().prints.front().map(|r| r.target.clone()) else {
            return Ok(None);
        };
        self.approve_print(&target).await?;
        Ok(Some(target))
    }

    /// Discards a queued print. The file itself is kept.
    pub fn reject_print(&self, target: &FileTarget) -> bool {
        let removed = self.inner.remove_print(target);
        if removed {
            info!(peer = %target.peer, file_id = %target.file_id, "Print rejected");
        }
        removed
    }

    /// Closes the customer's connection and forgets its files.
    pub fn close_customer(&self, peer: &Identity) -> bool {
        let mut state = self.inner.lock();
        if !state.registry.close(peer) {
            return false;
        }
        self.inner.drop_customer(&mut state, peer);
        true
    }

    /// Packs the selected completed files of `peer` into one archive.
    ///
    /// Files that are unselected or not yet complete are skipped. When
    /// `export_dir` is configured the archive is also written there.
    /// `on_complete` runs once the archive exists.
    pub async fn export_selected(
        &self,
        peer: &Identity,
        selected: &[FileId],
        on_complete: impl FnOnce(&Archive),
    ) -> Result<Archive, ReceiverError> {
        let customer = self
            .customer(peer)
            .ok_or_else(|| ReceiverError::UnknownCustomer(peer.clone()))?;
        let entries: Vec<ExportEntry> = customer
            .files
            .iter()
            .filter(|f| f.status == ReceivedFileStatus::Complete && selected.contains(f.file_id()))
            .filter_map(|f| {
                f.blob.as_ref().map(|blob| ExportEntry {
                    name: f.meta.name.clone(),
                    bytes: blob.bytes().clone(),
                })
            })
            .collect();
        debug!(
            peer = %peer,
            selected = selected.len(),
            eligible = entries.len(),
            "Exporting files"
        );

        let archive = build_archive(&customer.label, entries).await?;
        let path = match &self.inner.config.export_dir {
            Some(dir) => Some(archive.write_to(dir).await?),
            None => None,
        };

        on_complete(&archive);
        self.inner.emit(ReceiverEvent::ExportCompleted {
            peer: peer.clone(),
            archive_name: archive.file_name().to_string(),
            entries: archive.entry_count(),
            path,
        });
        Ok(archive)
    }

    /// Stops accepting connections and closes every customer.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let mut state = self.inner.lock();
        let closed = state.registry.close_all();
        if !state.prints.is_empty() {
            state.prints.clear();
            self.inner.emit(ReceiverEvent::PrintQueueChanged(Vec::new()));
        }
        for peer in closed {
            self.inner.emit(ReceiverEvent::CustomerRemoved { peer });
        }
    }
}

impl<T: Transport> Drop for ReceiverEngine<T> {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl<T: Transport> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State<T::Conn>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: ReceiverEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.events_tx.try_send(event) {
            warn!(?event, "Receiver event channel full, dropping event");
        }
    }

    async fn print(&self, job: PrintJob) -> Result<(), ReceiverError> {
        info!(
            customer = %job.customer_label,
            name = %job.file_name,
            bytes = job.bytes.len(),
            "Printing"
        );
        let sink = self.sink.clone();
        tokio::task::spawn_blocking(move || sink.print(&job)).await??;
        Ok(())
    }

    fn remove_print(&self, target: &FileTarget) -> bool {
        let mut state = self.lock();
        if state.prints.remove(target).is_none() {
            return false;
        }
        self.emit(ReceiverEvent::PrintQueueChanged(state.print_snapshot()));
        true
    }

    fn drop_customer(&self, state: &mut State<T::Conn>, peer: &Identity) {
        let before = state.prints.len();
        state.prints.retain(|r| &r.target.peer != peer);
        if state.prints.len() != before {
            self.emit(ReceiverEvent::PrintQueueChanged(state.print_snapshot()));
        }
        self.emit(ReceiverEvent::CustomerRemoved { peer: peer.clone() });
    }

    fn on_incoming(this: &Arc<Self>, link: Link<T::Conn>) {
        let Link { connection, events } = link;
        let peer = connection.peer().clone();
        let cancel = this.shutdown.child_token();

        let snapshot = {
            let mut state = this.lock();
            let snapshot = state.registry.upsert(connection.clone(), cancel.clone());
            let before = state.prints.len();
            // Entries whose file was dropped by the reconnect go too.
            let State { registry, prints } = &mut *state;
            prints.retain(|r| r.target.peer != peer || registry.blob(&peer, &r.target.file_id).is_some());
            if prints.len() != before {
                this.emit(ReceiverEvent::PrintQueueChanged(state.print_snapshot()));
            }
            snapshot
        };
        this.emit(ReceiverEvent::CustomerConnected(snapshot));

        tokio::spawn(run_customer(this.clone(), peer, connection, events, cancel));
    }

    fn handle_frame(&self, peer: &Identity, conn: &Arc<T::Conn>, frame: &[u8]) {
        let message = match decode(frame) {
            Ok(m) => m,
            Err(e) => {
                debug!(peer = %peer, error = %e, "Ignoring undecodable frame");
                return;
            }
        };

        let mut state = self.lock();
        match state.registry.apply(peer, conn, message) {
            Ok(Applied::Updated(file)) => self.emit(ReceiverEvent::FileUpdated {
                peer: peer.clone(),
                file,
            }),
            Ok(Applied::Completed { label, file }) => {
                let file_name = file.meta.name.clone();
                let file_id = file.file_id().clone();
                self.emit(ReceiverEvent::FileUpdated {
                    peer: peer.clone(),
                    file,
                });
                if self.config.print_on_complete {
                    let queued = state.prints.push_unique(PrintRequest {
                        target: FileTarget {
                            peer: peer.clone(),
                            file_id,
                        },
                        customer_label: label,
                        file_name,
                    });
                    if queued {
                        self.emit(ReceiverEvent::PrintQueueChanged(state.print_snapshot()));
                    }
                }
            }
            Ok(Applied::Unchanged) => {}
            Err(violation) => debug!(peer = %peer, %violation, "Ignoring message"),
        }
    }

    fn on_closed(&self, peer: &Identity, conn: &Arc<T::Conn>) {
        let mut state = self.lock();
        if state.registry.remove_if_current(peer, conn) {
            self.drop_customer(&mut state, peer);
        }
    }
}

async fn accept_loop<T: Transport>(inner: Arc<Inner<T>>, mut incoming: mpsc::Receiver<Link<T::Conn>>) {
    loop {
        let link = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            link = incoming.recv() => link,
        };
        match link {
            Some(link) => Inner::on_incoming(&inner, link),
            None => break,
        }
    }
    debug!("Accept loop stopped");
}

/// Reads one customer's frames until the link closes or is replaced.
async fn run_customer<T: Transport>(
    inner: Arc<Inner<T>>,
    peer: Identity,
    conn: Arc<T::Conn>,
    mut events: mpsc::Receiver<LinkEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Some(LinkEvent::Data(frame)) => inner.handle_frame(&peer, &conn, &frame),
            Some(LinkEvent::Closed) | None => {
                inner.on_closed(&peer, &conn);
                break;
            }
        }
    }
}
