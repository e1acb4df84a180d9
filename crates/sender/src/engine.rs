//! Customer-side engine: owns the outbound file queue, the connection to
//! one admin and the inbox of download requests awaiting the operator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use printlink_protocol::{ConnectMetadata, FileId, Identity, PeerMessage, decode, encode};
use printlink_store::{KeyValueStore, keys};
use printlink_transfer::{ApprovalQueue, SourceFile, StreamReport, TransferError, stream_file};
use printlink_transport::{Connection, Link, LinkEvent, Transport};

use crate::error::{ConnectionError, SenderError};
use crate::types::{
    ApprovalKind, ApprovalRequest, ConnectionStatus, QueuedFile, QueuedFileStatus, SenderConfig,
    SenderEvent,
};

const EVENT_CAPACITY: usize = 256;

struct Entry {
    source: SourceFile,
    status: QueuedFileStatus,
    progress: u8,
}

impl Entry {
    fn new(source: SourceFile) -> Self {
        Self {
            source,
            status: QueuedFileStatus::Queued,
            progress: 0,
        }
    }

    /// Moves to `next` if it is ahead of the current status.
    fn advance(&mut self, next: QueuedFileStatus) -> bool {
        if next > self.status {
            self.status = next;
            true
        } else {
            false
        }
    }

    fn snapshot(&self) -> QueuedFile {
        QueuedFile {
            meta: self.source.meta().clone(),
            status: self.status,
            progress: self.progress,
        }
    }
}

struct Session<C> {
    peer: Identity,
    conn: Arc<C>,
    cancel: CancellationToken,
    generation: u64,
}

struct State<C> {
    status: ConnectionStatus,
    files: Vec<Entry>,
    approvals: ApprovalQueue<ApprovalRequest>,
    session: Option<Session<C>>,
    /// File currently being streamed; at most one per connection.
    streaming: Option<FileId>,
    generation: u64,
}

impl<C> State<C> {
    fn open_connection(&self) -> Option<Arc<C>>
    where
        C: Connection,
    {
        self.session
            .as_ref()
            .filter(|s| s.conn.is_open())
            .map(|s| s.conn.clone())
    }

    fn approval_snapshot(&self) -> Vec<ApprovalRequest> {
        self.approvals.iter().cloned().collect()
    }
}

struct Inner<T: Transport> {
    transport: T,
    store: Arc<dyn KeyValueStore>,
    config: SenderConfig,
    state: Mutex<State<T::Conn>>,
    events_tx: mpsc::Sender<SenderEvent>,
    auto_attempted: AtomicBool,
}

/// Sender (customer) transfer engine.
pub struct SenderEngine<T: Transport> {
    inner: Arc<Inner<T>>,
    events_rx: Mutex<Option<mpsc::Receiver<SenderEvent>>>,
}

impl<T: Transport> SenderEngine<T> {
    /// Creates an engine on `transport`, which provides the ephemeral
    /// customer identity.
    pub fn new(transport: T, store: Arc<dyn KeyValueStore>, config: SenderConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                transport,
                store,
                config,
                state: Mutex::new(State {
                    status: ConnectionStatus::Idle,
                    files: Vec::new(),
                    approvals: ApprovalQueue::new(),
                    session: None,
                    streaming: None,
                    generation: 0,
                }),
                events_tx,
                auto_attempted: AtomicBool::new(false),
            }),
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<SenderEvent>> {
        self.events_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    pub fn identity(&self) -> &Identity {
        self.inner.transport.identity()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock().status
    }

    /// The admin currently connected to.
    pub fn peer(&self) -> Option<Identity> {
        self.inner.lock().session.as_ref().map(|s| s.peer.clone())
    }

    /// Queued files in insertion order.
    pub fn files(&self) -> Vec<QueuedFile> {
        self.inner.lock().files.iter().map(Entry::snapshot).collect()
    }

    /// Pending approval requests, oldest first.
    pub fn approvals(&self) -> Vec<ApprovalRequest> {
        self.inner.lock().approval_snapshot()
    }

    /// The admin remembered for auto-connect.
    pub fn last_admin(&self) -> Option<Identity> {
        self.inner.store.get(keys::LAST_ADMIN).map(Identity::new)
    }

    pub fn display_name(&self) -> Option<String> {
        self.inner.store.get(keys::DISPLAY_NAME)
    }

    /// Persists the name presented to the shop on the next connection.
    /// A blank name clears it.
    pub fn set_display_name(&self, name: &str) -> Result<(), SenderError> {
        let name = name.trim();
        if name.is_empty() {
            self.inner.store.remove(keys::DISPLAY_NAME)?;
        } else {
            self.inner.store.set(keys::DISPLAY_NAME, name)?;
        }
        Ok(())
    }

    /// Enters the scanning state while the UI reads a pairing code.
    pub fn begin_scan(&self) -> Result<(), SenderError> {
        let mut state = self.inner.lock();
        if state.status != ConnectionStatus::Idle {
            return Err(SenderError::Busy);
        }
        self.inner.set_status(&mut state, ConnectionStatus::Scanning);
        Ok(())
    }

    pub fn cancel_scan(&self) {
        let mut state = self.inner.lock();
        if state.status == ConnectionStatus::Scanning {
            self.inner.set_status(&mut state, ConnectionStatus::Idle);
        }
    }

    /// Connects to the admin named by a scanned pairing code.
    pub async fn connect_scanned(&self, payload: &str) -> Result<(), SenderError> {
        self.connect(payload, false).await
    }

    /// Connects once per engine lifetime to the last known admin.
    ///
    /// Returns `Ok(false)` when there is nothing to do: already attempted,
    /// no remembered admin, or the engine is not idle.
    pub async fn auto_connect(&self) -> Result<bool, SenderError> {
        if self.inner.auto_attempted.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        let Some(target) = self.inner.store.get(keys::LAST_ADMIN) else {
            return Ok(false);
        };
        if self.status() != ConnectionStatus::Idle {
            return Ok(false);
        }
        self.connect(&target, true).await?;
        Ok(true)
    }

    /// Opens a connection to `target` and replays `META` for every queued
    /// file.
    ///
    /// `auto` attempts use the shorter timeout and are flagged in the
    /// failure event so the UI does not prompt. Any existing connection is
    /// closed first.
    pub async fn connect(&self, target: &str, auto: bool) -> Result<(), SenderError> {
        let target = Identity::parse_target(target)
            .ok_or_else(|| SenderError::InvalidTarget(target.to_string()))?;

        {
            let mut state = self.inner.lock();
            if matches!(
                state.status,
                ConnectionStatus::Connecting | ConnectionStatus::AutoConnecting
            ) {
                return Err(SenderError::ConnectInProgress);
            }
            if let Some(session) = state.session.take() {
                session.cancel.cancel();
                session.conn.close();
            }
            let status = if auto {
                ConnectionStatus::AutoConnecting
            } else {
                ConnectionStatus::Connecting
            };
            self.inner.set_status(&mut state, status);
        }

        let metadata = ConnectMetadata::with_username(self.display_name().unwrap_or_default());
        let timeout = if auto {
            self.inner.config.auto_connect_timeout
        } else {
            self.inner.config.connect_timeout
        };
        info!(target = %target, auto, "Connecting to admin");

        let attempt = self.inner.transport.connect(&target, metadata);
        let result = match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(link)) => Ok(link),
            Ok(Err(e)) => {
                debug!(target = %target, error = %e, "Transport refused connection");
                Err(ConnectionError::Unreachable(target.clone()))
            }
            Err(_) => Err(ConnectionError::Timeout {
                target: target.clone(),
                after: timeout,
            }),
        };

        match result {
            Ok(link) => Inner::attach(&self.inner, target, link),
            Err(e) => {
                warn!(target = %target, auto, error = %e, "Connection attempt failed");
                {
                    let mut state = self.inner.lock();
                    self.inner.set_status(&mut state, ConnectionStatus::Idle);
                }
                self.inner.emit(SenderEvent::ConnectFailed {
                    target,
                    auto,
                    message: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Appends files to the queue. When connected, each is announced
    /// immediately.
    pub fn enqueue_files(&self, files: impl IntoIterator<Item = SourceFile>) -> Vec<FileId> {
        let mut state = self.inner.lock();
        let conn = state.open_connection();
        let mut ids = Vec::new();

        for mut source in files {
            while state.files.iter().any(|e| e.source.id() == source.id()) {
                source = source.with_id(FileId::generate());
            }
            let mut entry = Entry::new(source);

            if let Some(conn) = &conn {
                match send_message(&**conn, &PeerMessage::Meta(entry.source.meta().clone())) {
                    Ok(()) => {
                        entry.advance(QueuedFileStatus::MetaSent);
                    }
                    Err(e) => warn!(file_id = %entry.source.id(), error = %e, "Failed to announce file"),
                }
            }

            debug!(
                file_id = %entry.source.id(),
                name = %entry.source.name(),
                bytes = entry.source.size(),
                status = ?entry.status,
                "File queued"
            );
            ids.push(entry.source.id().clone());
            self.inner.emit(SenderEvent::FileUpdated(entry.snapshot()));
            state.files.push(entry);
        }
        ids
    }

    /// Accepts the oldest pending request and starts streaming its file in
    /// the background.
    ///
    /// Returns `Ok(None)` without touching the queue when it is empty or no
    /// connection is open, and [`SenderError::Busy`] while another file is
    /// still streaming.
    pub fn approve_head(&self) -> Result<Option<FileId>, SenderError> {
        let (conn, source) = {
            let mut state = self.inner.lock();
            let Some(conn) = state.open_connection() else {
                return Ok(None);
            };
            if state.approvals.is_empty() {
                return Ok(None);
            }
            if state.streaming.is_some() {
                return Err(SenderError::Busy);
            }
            let Some(request) = state.approvals.pop_front() else {
                return Ok(None);
            };
            self.inner
                .emit(SenderEvent::ApprovalsChanged(state.approval_snapshot()));

            let State {
                files, streaming, ..
            } = &mut *state;
            let Some(entry) = files.iter_mut().find(|e| e.source.id() == &request.file_id) else {
                warn!(file_id = %request.file_id, "Approved file is no longer queued");
                return Ok(None);
            };
            *streaming = Some(request.file_id.clone());
            if entry.advance(QueuedFileStatus::Transferring) {
                self.inner.emit(SenderEvent::FileUpdated(entry.snapshot()));
            }
            (conn, entry.source.clone())
        };

        let file_id = source.id().clone();
        info!(
            file_id = %file_id,
            name = %source.name(),
            bytes = source.size(),
            "Streaming approved file"
        );

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let id = source.id().clone();
            let result = stream_file(&*conn, &source, &inner.config.stream, |p| {
                inner.set_progress(&id, p)
            })
            .await;
            inner.finish_stream(&id, result);
        });
        Ok(Some(file_id))
    }

    /// Declines the oldest pending request and tells the admin. The file's
    /// status is left as is so it can be requested again.
    ///
    /// Returns `None` when the queue is empty or no connection is open.
    pub fn deny_head(&self) -> Option<FileId> {
        let mut state = self.inner.lock();
        let conn = state.open_connection()?;
        let request = state.approvals.pop_front()?;
        self.inner
            .emit(SenderEvent::ApprovalsChanged(state.approval_snapshot()));

        if let Err(e) = send_message(
            &*conn,
            &PeerMessage::DenyDownload {
                file_id: request.file_id.clone(),
            },
        ) {
            warn!(file_id = %request.file_id, error = %e, "Failed to send denial");
        }
        info!(file_id = %request.file_id, "Download denied");
        Some(request.file_id)
    }

    /// Closes the connection and forgets the remembered admin.
    pub fn disconnect(&self) -> Result<(), SenderError> {
        {
            let mut state = self.inner.lock();
            if let Some(session) = state.session.take() {
                session.cancel.cancel();
                session.conn.close();
                info!(peer = %session.peer, "Disconnected from admin");
            }
            self.inner.set_status(&mut state, ConnectionStatus::Idle);
        }
        self.inner.store.remove(keys::LAST_ADMIN)?;
        Ok(())
    }
}

impl<T: Transport> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State<T::Conn>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: SenderEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.events_tx.try_send(event) {
            warn!(?event, "Sender event channel full, dropping event");
        }
    }

    fn set_status(&self, state: &mut State<T::Conn>, status: ConnectionStatus) {
        if state.status != status {
            state.status = status;
            self.emit(SenderEvent::StatusChanged(status));
        }
    }

    fn attach(
        this: &Arc<Self>,
        target: Identity,
        link: Link<T::Conn>,
    ) -> Result<(), SenderError> {
        let Link { connection, events } = link;
        let cancel = CancellationToken::new();

        let generation = {
            let mut state = this.lock();
            if !matches!(
                state.status,
                ConnectionStatus::Connecting | ConnectionStatus::AutoConnecting
            ) {
                debug!(target = %target, "Connection attempt abandoned");
                connection.close();
                return Err(SenderError::Cancelled);
            }

            state.generation += 1;
            let generation = state.generation;
            state.session = Some(Session {
                peer: target.clone(),
                conn: connection.clone(),
                cancel: cancel.clone(),
                generation,
            });
            this.set_status(&mut state, ConnectionStatus::Connected);

            let mut announced = 0usize;
            for entry in state.files.iter_mut() {
                match send_message(&*connection, &PeerMessage::Meta(entry.source.meta().clone())) {
                    Ok(()) => {
                        announced += 1;
                        if entry.advance(QueuedFileStatus::MetaSent) {
                            this.emit(SenderEvent::FileUpdated(entry.snapshot()));
                        }
                    }
                    Err(e) => warn!(file_id = %entry.source.id(), error = %e, "Failed to announce file"),
                }
            }
            info!(peer = %target, announced, "Connected to admin");
            generation
        };

        if let Err(e) = this.store.set(keys::LAST_ADMIN, target.as_str()) {
            warn!(error = %e, "Failed to remember admin");
        }

        tokio::spawn(run_session(this.clone(), events, generation, cancel));
        Ok(())
    }

    fn handle_frame(&self, frame: &[u8]) {
        let message = match decode(frame) {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "Ignoring undecodable frame");
                return;
            }
        };
        let PeerMessage::RequestDownload { file_id } = message else {
            debug!(kind = %message.kind(), "Ignoring message meant for the admin side");
            return;
        };

        let mut state = self.lock();
        let State {
            files, approvals, ..
        } = &mut *state;
        let Some(entry) = files.iter_mut().find(|e| e.source.id() == &file_id) else {
            debug!(file_id = %file_id, "Download request for unknown file");
            return;
        };

        let queued = approvals.push_unique(ApprovalRequest {
            file_id: file_id.clone(),
            file_name: entry.source.name().to_string(),
            kind: ApprovalKind::Download,
        });
        if !queued {
            debug!(file_id = %file_id, "Download request already pending");
            return;
        }

        info!(file_id = %file_id, name = %entry.source.name(), "Download requested");
        if entry.advance(QueuedFileStatus::Requested) {
            self.emit(SenderEvent::FileUpdated(entry.snapshot()));
        }
        self.emit(SenderEvent::ApprovalsChanged(
            approvals.iter().cloned().collect(),
        ));
    }

    fn on_closed(&self, generation: u64) {
        let mut state = self.lock();
        let current = state
            .session
            .as_ref()
            .is_some_and(|s| s.generation == generation);
        if !current {
            return;
        }
        if let Some(session) = state.session.take() {
            session.cancel.cancel();
            info!(peer = %session.peer, "Admin closed the connection");
            self.set_status(&mut state, ConnectionStatus::Idle);
            self.emit(SenderEvent::Disconnected { peer: session.peer });
        }
    }

    fn set_progress(&self, file_id: &FileId, progress: u8) {
        let mut state = self.lock();
        let Some(entry) = state.files.iter_mut().find(|e| e.source.id() == file_id) else {
            return;
        };
        if entry.status == QueuedFileStatus::Transferring && progress > entry.progress {
            entry.progress = progress;
            self.emit(SenderEvent::FileUpdated(entry.snapshot()));
        }
    }

    fn finish_stream(&self, file_id: &FileId, result: Result<StreamReport, TransferError>) {
        let mut state = self.lock();
        if state.streaming.as_ref() == Some(file_id) {
            state.streaming = None;
        }
        let Some(entry) = state.files.iter_mut().find(|e| e.source.id() == file_id) else {
            return;
        };

        match result {
            Ok(report) => {
                info!(
                    file_id = %file_id,
                    bytes = report.bytes_sent,
                    chunks = report.chunks,
                    checksum = %report.checksum,
                    "File sent"
                );
                entry.advance(QueuedFileStatus::Sent);
                entry.progress = 100;
                self.emit(SenderEvent::FileUpdated(entry.snapshot()));
            }
            Err(e) => {
                warn!(file_id = %file_id, error = %e, "Streaming failed");
                self.emit(SenderEvent::StreamFailed {
                    file_id: file_id.clone(),
                    message: e.to_string(),
                });
            }
        }
    }
}

/// Reads inbound frames until the link closes or the session is cancelled.
async fn run_session<T: Transport>(
    inner: Arc<Inner<T>>,
    mut events: mpsc::Receiver<LinkEvent>,
    generation: u64,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Some(LinkEvent::Data(frame)) => inner.handle_frame(&frame),
            Some(LinkEvent::Closed) | None => {
                inner.on_closed(generation);
                break;
            }
        }
    }
}

fn send_message<C: Connection + ?Sized>(conn: &C, message: &PeerMessage) -> Result<(), TransferError> {
    conn.send(encode(message)?)?;
    Ok(())
}
