//! Shared fixtures for the end-to-end scenarios: a shop (admin engine) and
//! any number of customers (sender engines) on one in-memory network.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use printlink_protocol::{FileId, Identity};
use printlink_receiver::{
    PrintError, PrintJob, PrintSink, ReceivedFile, ReceiverConfig, ReceiverEngine,
};
use printlink_sender::{SenderConfig, SenderEngine};
use printlink_store::{KeyValueStore, MemoryStore};
use printlink_transport::{MemoryNetwork, MemoryTransport};

pub const ADMIN: &str = "ADMIN-E2E001";

/// Print sink that keeps every job in memory.
#[derive(Default)]
pub struct RecordingPrinter {
    jobs: Mutex<Vec<PrintJob>>,
}

impl RecordingPrinter {
    pub fn jobs(&self) -> Vec<PrintJob> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl PrintSink for RecordingPrinter {
    fn print(&self, job: &PrintJob) -> Result<(), PrintError> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(job.clone());
        Ok(())
    }
}

pub struct Shop {
    pub network: MemoryNetwork,
    pub engine: ReceiverEngine<MemoryTransport>,
    pub printer: Arc<RecordingPrinter>,
}

impl Shop {
    pub fn open() -> Self {
        Self::open_on(MemoryNetwork::new(), ReceiverConfig::default())
    }

    /// Starts an admin engine on `network` listening as [`ADMIN`].
    pub fn open_on(network: MemoryNetwork, config: ReceiverConfig) -> Self {
        let printer = Arc::new(RecordingPrinter::default());
        let transport = network
            .bind(Identity::new(ADMIN))
            .unwrap_or_else(|e| panic!("bind {ADMIN}: {e}"));
        let engine = ReceiverEngine::new(transport, printer.clone(), config);
        engine
            .start()
            .unwrap_or_else(|e| panic!("start receiver: {e}"));
        Self {
            network,
            engine,
            printer,
        }
    }

    pub fn admin(&self) -> Identity {
        Identity::new(ADMIN)
    }

    /// Creates a customer with its own store on the shop's network.
    pub fn customer(&self, name: &str) -> Customer {
        self.customer_with(name, SenderConfig::default())
    }

    pub fn customer_with(&self, name: &str, config: SenderConfig) -> Customer {
        let store = Arc::new(MemoryStore::new());
        let engine = SenderEngine::new(self.network.bind_ephemeral(), store.clone(), config);
        if !name.is_empty() {
            engine
                .set_display_name(name)
                .unwrap_or_else(|e| panic!("set display name: {e}"));
        }
        Customer { engine, store }
    }

    /// The shop's view of one customer file.
    pub fn file(&self, customer: &Identity, file_id: &FileId) -> Option<ReceivedFile> {
        self.engine
            .customer(customer)
            .and_then(|c| c.file(file_id).cloned())
    }
}

pub struct Customer {
    pub engine: SenderEngine<MemoryTransport>,
    pub store: Arc<MemoryStore>,
}

impl Customer {
    pub fn identity(&self) -> Identity {
        self.engine.identity().clone()
    }

    pub fn remembered_admin(&self) -> Option<String> {
        self.store.get(printlink_store::keys::LAST_ADMIN)
    }
}

/// Deterministic test content.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

/// Polls `check` until it holds, panicking with `what` after five seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}
