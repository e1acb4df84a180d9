use std::io::{Cursor, Read};

use printlink_e2e::{ADMIN, Shop, eventually, pattern};
use printlink_protocol::FileId;
use printlink_receiver::{ExportError, ReceivedFileStatus, ReceiverConfig, ReceiverError};
use printlink_transport::MemoryNetwork;
use printlink_transfer::SourceFile;

fn unzip(bytes: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).unwrap();
        if file.is_dir() {
            continue;
        }
        let mut data = Vec::new();
        file.read_to_end(&mut data).unwrap();
        entries.push((file.name().to_string(), data));
    }
    entries
}

/// Connects a customer with `files`, completes the first `complete` of
/// them and returns the customer's identity with all file ids.
async fn shop_with_files(
    shop: &Shop,
    label: &str,
    files: &[(&str, Vec<u8>)],
    complete: usize,
) -> (printlink_protocol::Identity, Vec<FileId>, printlink_e2e::Customer) {
    let customer = shop.customer(label);
    let ids = customer.engine.enqueue_files(
        files
            .iter()
            .map(|(name, data)| SourceFile::from_bytes(*name, data.clone())),
    );
    customer.engine.connect(ADMIN, false).await.unwrap();
    let peer = customer.identity();
    eventually("announced files", || {
        shop.engine
            .customer(&peer)
            .is_some_and(|c| c.files.len() == files.len())
    })
    .await;

    for id in ids.iter().take(complete) {
        shop.engine.request_download(&peer, id).unwrap();
        eventually("approval request", || !customer.engine.approvals().is_empty()).await;
        customer.engine.approve_head().unwrap();
        eventually("completed file", || {
            shop.file(&peer, id)
                .is_some_and(|f| f.status == ReceivedFileStatus::Complete)
        })
        .await;
    }
    (peer, ids, customer)
}

#[tokio::test]
async fn exports_only_selected_complete_files() {
    let dir = tempfile::tempdir().unwrap();
    let shop = Shop::open_on(
        MemoryNetwork::new(),
        ReceiverConfig {
            export_dir: Some(dir.path().to_path_buf()),
            ..ReceiverConfig::default()
        },
    );
    let files = [
        ("menu.pdf", pattern(5_000)),
        ("logo.png", pattern(70_000)),
        ("draft.docx", pattern(2_000)),
        ("notes.txt", pattern(10)),
    ];
    let (peer, ids, _customer) = shop_with_files(&shop, "Café Luna", &files, 3).await;

    // Three complete, one pending; select two complete plus the pending one.
    let selected = [ids[0].clone(), ids[2].clone(), ids[3].clone()];
    let mut callbacks = 0;
    let archive = shop
        .engine
        .export_selected(&peer, &selected, |_| callbacks += 1)
        .await
        .unwrap();

    assert_eq!(callbacks, 1);
    assert_eq!(archive.folder(), "Caf__Luna_Files");
    assert_eq!(archive.file_name(), "Caf__Luna_Files.zip");
    assert_eq!(archive.entry_count(), 2);

    let entries = unzip(archive.bytes());
    assert_eq!(
        entries,
        vec![
            ("Caf__Luna_Files/menu.pdf".to_string(), pattern(5_000)),
            ("Caf__Luna_Files/draft.docx".to_string(), pattern(2_000)),
        ]
    );

    let written = std::fs::read(dir.path().join("Caf__Luna_Files.zip")).unwrap();
    assert_eq!(written, archive.bytes());
}

#[tokio::test]
async fn nothing_eligible_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let shop = Shop::open_on(
        MemoryNetwork::new(),
        ReceiverConfig {
            export_dir: Some(dir.path().to_path_buf()),
            ..ReceiverConfig::default()
        },
    );
    let files = [("a.pdf", pattern(100)), ("b.pdf", pattern(100))];
    let (peer, ids, _customer) = shop_with_files(&shop, "Ana", &files, 1).await;

    let mut called = false;
    let err = shop
        .engine
        .export_selected(&peer, &ids[1..], |_| called = true)
        .await
        .unwrap_err();
    assert!(matches!(err, ReceiverError::Export(ExportError::NoEligibleFiles)));
    assert!(!called);

    let err = shop
        .engine
        .export_selected(&peer, &[], |_| called = true)
        .await
        .unwrap_err();
    assert!(matches!(err, ReceiverError::Export(ExportError::NoEligibleFiles)));
    assert!(!called);

    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn export_for_unknown_customer() {
    let shop = Shop::open();
    let err = shop
        .engine
        .export_selected(&printlink_protocol::Identity::new("PEER-GONE01"), &[], |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, ReceiverError::UnknownCustomer(_)));
}
