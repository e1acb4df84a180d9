//! Loopback session: one customer and one admin on an in-memory network.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use printlink_protocol::format_bytes;
use printlink_receiver::{
    PairingCode, ReceivedFileStatus, ReceiverEngine, SpoolDirPrinter, load_or_create_identity,
};
use printlink_sender::{QueuedFileStatus, SenderEngine, SenderError};
use printlink_store::{JsonFileStore, KeyValueStore, MemoryStore, default_store_path};
use printlink_transfer::SourceFile;
use printlink_transport::MemoryNetwork;

use crate::config::PrintlinkConfig;

const POLL: Duration = Duration::from_millis(20);
const SESSION_TIMEOUT: Duration = Duration::from_secs(120);

const SAMPLE_NAME: &str = "welcome.txt";
const SAMPLE_BODY: &[u8] = b"printlink loopback sample\n";

pub async fn run(config: PrintlinkConfig, paths: Vec<PathBuf>) -> anyhow::Result<()> {
    let store = open_store(&config)?;

    let network = MemoryNetwork::new();
    let admin_id = load_or_create_identity(&*store)?;
    let pairing = PairingCode::new(admin_id.clone())?;
    println!("Scan to connect to {}:\n{}", pairing.identity(), pairing.to_unicode());

    let receiver = ReceiverEngine::new(
        network.bind(admin_id)?,
        Arc::new(SpoolDirPrinter::new(&config.spool_dir)),
        config.receiver(),
    );
    receiver.start()?;

    let sender = SenderEngine::new(network.bind_ephemeral(), store.clone(), config.sender());
    if !config.display_name.is_empty() {
        sender.set_display_name(&config.display_name)?;
    }

    let mut sources = Vec::new();
    for path in &paths {
        sources.push(SourceFile::from_path(path).await?);
    }
    if sources.is_empty() {
        sources.push(SourceFile::from_bytes(SAMPLE_NAME, SAMPLE_BODY).with_mime_type("text/plain"));
    }
    let total: u64 = sources.iter().map(SourceFile::size).sum();
    let ids = sender.enqueue_files(sources);
    info!(files = ids.len(), size = %format_bytes(total), "Files queued");

    sender.begin_scan()?;
    sender.connect_scanned(pairing.identity().as_str()).await?;

    let customer = sender.identity().clone();
    tokio::time::timeout(SESSION_TIMEOUT, async {
        wait_until(|| {
            receiver
                .customer(&customer)
                .is_some_and(|c| c.files.len() == ids.len())
        })
        .await;
        receiver.request_all(&customer)?;

        // Approve on the customer side one file at a time.
        loop {
            match sender.approve_head() {
                Ok(_) | Err(SenderError::Busy) => {}
                Err(e) => return Err(e.into()),
            }
            let done = receiver.customer(&customer).is_some_and(|c| {
                c.files
                    .iter()
                    .all(|f| f.status == ReceivedFileStatus::Complete)
            });
            if done {
                break;
            }
            tokio::time::sleep(POLL).await;
        }
        wait_until(|| {
            sender
                .files()
                .iter()
                .all(|f| f.status == QueuedFileStatus::Sent)
        })
        .await;
        anyhow::Ok(())
    })
    .await
    .map_err(|_| anyhow::anyhow!("session did not finish within {SESSION_TIMEOUT:?}"))??;

    while let Some(target) = receiver.approve_next_print().await? {
        info!(file_id = %target.file_id, "Print approved");
    }

    let archive = receiver
        .export_selected(&customer, &ids, |archive| {
            info!(
                archive = %archive.file_name(),
                entries = archive.entry_count(),
                size = %format_bytes(archive.bytes().len() as u64),
                "Export ready"
            );
        })
        .await?;
    println!(
        "Exported {} file(s) to {}",
        archive.entry_count(),
        config.export_dir.join(archive.file_name()).display()
    );

    sender.disconnect()?;
    receiver.shutdown();
    Ok(())
}

fn open_store(config: &PrintlinkConfig) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    let path = config.store_path.clone().or_else(default_store_path);
    match path {
        Some(path) => {
            info!(path = %path.display(), "Opening store");
            Ok(Arc::new(JsonFileStore::open(path)?))
        }
        None => {
            warn!("No store location available, state will not persist");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    while !check() {
        tokio::time::sleep(POLL).await;
    }
}
