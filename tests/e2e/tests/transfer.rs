use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use printlink_e2e::{ADMIN, Shop, eventually, pattern};
use printlink_protocol::{ConnectMetadata, FileId, FileMeta, Identity, PeerMessage, decode, encode};
use printlink_receiver::{ReceivedFileStatus, ReceiverConfig, ReceiverEvent};
use printlink_sender::{ConnectionStatus, QueuedFileStatus, SenderConfig, SenderError};
use printlink_store::{JsonFileStore, KeyValueStore};
use printlink_transfer::{SourceFile, StreamOptions, stream_file};
use printlink_transport::{Connection, LinkEvent, MemoryNetwork, Transport};

const TEN_MB: usize = 10 * 1024 * 1024;

#[tokio::test]
async fn file_queued_offline_is_announced_on_connect() {
    let shop = Shop::open();
    let customer = shop.customer("Ana");

    let ids = customer
        .engine
        .enqueue_files([SourceFile::from_bytes("poster.pdf", vec![0u8; TEN_MB])]);
    assert_eq!(customer.engine.files()[0].status, QueuedFileStatus::Queued);
    assert!(shop.engine.customers().is_empty());

    customer.engine.connect(ADMIN, false).await.unwrap();
    assert_eq!(customer.engine.files()[0].status, QueuedFileStatus::MetaSent);

    let peer = customer.identity();
    eventually("announced file", || shop.file(&peer, &ids[0]).is_some()).await;
    let file = shop.file(&peer, &ids[0]).unwrap();
    assert_eq!(file.meta.size, 10_485_760);
    assert_eq!(file.meta.name, "poster.pdf");
    assert_eq!(file.status, ReceivedFileStatus::Pending);
    assert_eq!(shop.engine.customer(&peer).unwrap().label, "Ana");
}

#[tokio::test]
async fn request_approve_and_receive() {
    let shop = Shop::open();
    let mut events = shop.engine.take_events().unwrap();
    let customer = shop.customer("Ana");
    let data = pattern(300_000);
    let ids = customer
        .engine
        .enqueue_files([SourceFile::from_bytes("flyer.png", data.clone())]);
    customer.engine.connect(ADMIN, false).await.unwrap();
    let peer = customer.identity();
    eventually("announced file", || shop.file(&peer, &ids[0]).is_some()).await;

    shop.engine.request_download(&peer, &ids[0]).unwrap();
    eventually("approval request", || customer.engine.approvals().len() == 1).await;
    let approvals = customer.engine.approvals();
    assert_eq!(approvals[0].file_id, ids[0]);
    assert_eq!(approvals[0].file_name, "flyer.png");

    customer.engine.approve_head().unwrap();
    eventually("completed file", || {
        shop.file(&peer, &ids[0])
            .is_some_and(|f| f.status == ReceivedFileStatus::Complete)
    })
    .await;

    let file = shop.file(&peer, &ids[0]).unwrap();
    assert_eq!(file.progress, 100);
    assert_eq!(file.bytes_received, data.len() as u64);
    let blob = file.blob.unwrap();
    assert_eq!(&blob.bytes()[..], &data[..]);
    assert_eq!(blob.mime_type(), "image/png");
    assert!(blob.size_matches());

    eventually("sender marked sent", || {
        customer.engine.files()[0].status == QueuedFileStatus::Sent
    })
    .await;
    assert_eq!(customer.engine.files()[0].progress, 100);

    let mut statuses = Vec::new();
    let mut progress = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ReceiverEvent::FileUpdated { file, .. } = event {
            if statuses.last() != Some(&file.status) {
                statuses.push(file.status);
            }
            progress.push(file.progress);
        }
    }
    assert_eq!(
        statuses,
        [
            ReceivedFileStatus::Pending,
            ReceivedFileStatus::Requested,
            ReceivedFileStatus::Transferring,
            ReceivedFileStatus::Complete,
        ]
    );
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");

    // Completion queued a print; approving it reaches the printer.
    assert_eq!(shop.engine.pending_prints().len(), 1);
    shop.engine.approve_next_print().await.unwrap();
    let jobs = shop.printer.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].customer_label, "Ana");
    assert_eq!(&jobs[0].bytes[..], &data[..]);
}

#[tokio::test]
async fn files_stream_one_after_another() {
    let shop = Shop::open();
    let customer = shop.customer("");
    let first = pattern(150_000);
    let second = pattern(90_000);
    let ids = customer.engine.enqueue_files([
        SourceFile::from_bytes("a.bin", first.clone()),
        SourceFile::from_bytes("b.bin", second.clone()),
    ]);
    customer.engine.connect(ADMIN, false).await.unwrap();
    let peer = customer.identity();
    eventually("both files announced", || {
        shop.engine
            .customer(&peer)
            .is_some_and(|c| c.files.len() == 2)
    })
    .await;
    assert!(shop.engine.customer(&peer).unwrap().label.starts_with("Device "));

    assert_eq!(shop.engine.request_all(&peer).unwrap(), ids);
    eventually("two approvals", || customer.engine.approvals().len() == 2).await;

    assert_eq!(customer.engine.approve_head().unwrap(), Some(ids[0].clone()));
    // The stream task has not run yet, so the second file must wait.
    assert!(matches!(customer.engine.approve_head(), Err(SenderError::Busy)));
    assert_eq!(customer.engine.approvals()[0].file_id, ids[1]);

    eventually("first file complete", || {
        shop.file(&peer, &ids[0])
            .is_some_and(|f| f.status == ReceivedFileStatus::Complete)
    })
    .await;
    eventually("first stream finished", || {
        customer.engine.files()[0].status == QueuedFileStatus::Sent
    })
    .await;
    assert_eq!(customer.engine.approve_head().unwrap(), Some(ids[1].clone()));
    eventually("second file complete", || {
        shop.file(&peer, &ids[1])
            .is_some_and(|f| f.status == ReceivedFileStatus::Complete)
    })
    .await;

    let c = shop.engine.customer(&peer).unwrap();
    assert_eq!(&c.files[0].blob.as_ref().unwrap().bytes()[..], &first[..]);
    assert_eq!(&c.files[1].blob.as_ref().unwrap().bytes()[..], &second[..]);
}

#[tokio::test]
async fn denied_then_requested_again() {
    let shop = Shop::open();
    let customer = shop.customer("Bo");
    let ids = customer
        .engine
        .enqueue_files([SourceFile::from_bytes("cv.pdf", pattern(1000))]);
    customer.engine.connect(ADMIN, false).await.unwrap();
    let peer = customer.identity();
    eventually("announced file", || shop.file(&peer, &ids[0]).is_some()).await;

    shop.engine.request_download(&peer, &ids[0]).unwrap();
    eventually("approval request", || customer.engine.approvals().len() == 1).await;
    assert_eq!(customer.engine.deny_head(), Some(ids[0].clone()));

    eventually("denied status", || {
        shop.file(&peer, &ids[0])
            .is_some_and(|f| f.status == ReceivedFileStatus::Denied)
    })
    .await;
    assert_eq!(customer.engine.files()[0].status, QueuedFileStatus::MetaSent);

    shop.engine.request_download(&peer, &ids[0]).unwrap();
    eventually("second approval request", || {
        customer.engine.approvals().len() == 1
    })
    .await;
    customer.engine.approve_head().unwrap();
    eventually("completed after re-request", || {
        shop.file(&peer, &ids[0])
            .is_some_and(|f| f.status == ReceivedFileStatus::Complete)
    })
    .await;
}

#[tokio::test]
async fn close_mid_transfer_drops_customer() {
    let shop = Shop::open();
    let mut events = shop.engine.take_events().unwrap();
    let transport = shop.network.bind_ephemeral();
    let mut link = transport
        .connect(&shop.admin(), ConnectMetadata::with_username("Cy"))
        .await
        .unwrap();
    let peer = link.connection.peer().clone();
    let file_id = FileId::new("BIG001");

    let send = |message: PeerMessage| link.connection.send(encode(&message).unwrap()).unwrap();
    send(PeerMessage::Meta(FileMeta {
        id: file_id.clone(),
        name: "big.tif".into(),
        size: 1_000_000,
        mime_type: "image/tiff".into(),
    }));
    eventually("announced file", || shop.file(&peer, &file_id).is_some()).await;

    shop.engine.request_download(&peer, &file_id).unwrap();
    match link.events.recv().await {
        Some(LinkEvent::Data(frame)) => assert_eq!(
            decode(&frame).unwrap(),
            PeerMessage::RequestDownload {
                file_id: file_id.clone()
            }
        ),
        other => panic!("expected request, got {other:?}"),
    }
    send(PeerMessage::Chunk {
        file_id: file_id.clone(),
        data: vec![7; 65_536],
    });
    eventually("transferring", || {
        shop.file(&peer, &file_id)
            .is_some_and(|f| f.status == ReceivedFileStatus::Transferring)
    })
    .await;

    link.connection.close();
    eventually("customer removed", || shop.engine.customers().is_empty()).await;
    assert!(shop.engine.customer(&peer).is_none());
    assert!(shop.engine.pending_prints().is_empty());

    let mut removed = 0;
    while let Ok(event) = events.try_recv() {
        if let ReceiverEvent::CustomerRemoved { peer: p } = event {
            assert_eq!(p, peer);
            removed += 1;
        }
    }
    assert_eq!(removed, 1);
}

#[tokio::test]
async fn customer_disconnect_removes_files() {
    let shop = Shop::open();
    let customer = shop.customer("Di");
    let ids = customer
        .engine
        .enqueue_files([SourceFile::from_bytes("a.txt", b"abc".to_vec())]);
    customer.engine.connect(ADMIN, false).await.unwrap();
    let peer = customer.identity();
    eventually("announced file", || shop.file(&peer, &ids[0]).is_some()).await;

    customer.engine.disconnect().unwrap();
    eventually("customer removed", || shop.engine.customers().is_empty()).await;
    assert!(customer.remembered_admin().is_none());
    assert_eq!(customer.engine.status(), ConnectionStatus::Idle);
}

#[tokio::test]
async fn slow_link_applies_backpressure() {
    let network = MemoryNetwork::with_delivery_capacity(1);
    let shop = Shop::open_on(network, ReceiverConfig::default());
    let mut config = SenderConfig::default();
    config.stream.chunk_size = 16 * 1024;
    config.stream.high_water_mark = 64 * 1024;
    config.stream.poll_interval = Duration::from_millis(1);
    let customer = shop.customer_with("Ed", config);

    let data = pattern(1_000_000);
    let ids = customer
        .engine
        .enqueue_files([SourceFile::from_bytes("scan.raw", data.clone())]);
    customer.engine.connect(ADMIN, false).await.unwrap();
    let peer = customer.identity();
    eventually("announced file", || shop.file(&peer, &ids[0]).is_some()).await;

    shop.engine.request_download(&peer, &ids[0]).unwrap();
    eventually("approval request", || customer.engine.approvals().len() == 1).await;
    customer.engine.approve_head().unwrap();
    eventually("completed file", || {
        shop.file(&peer, &ids[0])
            .is_some_and(|f| f.status == ReceivedFileStatus::Complete)
    })
    .await;
    let blob = shop.file(&peer, &ids[0]).unwrap().blob.unwrap();
    assert_eq!(&blob.bytes()[..], &data[..]);
}

#[tokio::test]
async fn buffered_bytes_stay_bounded() {
    let network = MemoryNetwork::with_delivery_capacity(1);
    let admin = network.bind(Identity::new(ADMIN)).unwrap();
    let mut incoming = admin.incoming().unwrap();
    let customer = network.bind_ephemeral();
    let link = customer
        .connect(&Identity::new(ADMIN), ConnectMetadata::default())
        .await
        .unwrap();
    let mut remote = incoming.recv().await.unwrap();

    let options = StreamOptions {
        chunk_size: 8 * 1024,
        high_water_mark: 32 * 1024,
        poll_interval: Duration::from_millis(1),
    };
    let file = SourceFile::from_bytes("big.bin", pattern(400_000));

    // Sample the gauge while a slow reader drains the link.
    let conn = link.connection.clone();
    let done = Arc::new(AtomicBool::new(false));
    let peak = Arc::new(AtomicUsize::new(0));
    let sampler = {
        let (done, peak) = (done.clone(), peak.clone());
        tokio::spawn(async move {
            while !done.load(Ordering::Acquire) {
                peak.fetch_max(conn.buffered_amount(), Ordering::AcqRel);
                tokio::task::yield_now().await;
            }
        })
    };
    let reader = tokio::spawn(async move {
        let mut bytes = 0usize;
        while let Some(LinkEvent::Data(frame)) = remote.events.recv().await {
            match decode(&frame).unwrap() {
                PeerMessage::Chunk { data, .. } => bytes += data.len(),
                PeerMessage::End { .. } => break,
                other => panic!("unexpected {other:?}"),
            }
            tokio::time::sleep(Duration::from_micros(200)).await;
        }
        bytes
    });

    let report = stream_file(&*link.connection, &file, &options, |_| {})
        .await
        .unwrap();
    assert_eq!(reader.await.unwrap(), 400_000);
    done.store(true, Ordering::Release);
    sampler.await.unwrap();

    let bound = options.high_water_mark + options.chunk_size + 1024;
    assert!(report.peak_buffered <= options.high_water_mark);
    assert!(peak.load(Ordering::Acquire) <= bound);
}

#[tokio::test]
async fn returning_customer_reaches_same_admin() {
    let dir = tempfile::tempdir().unwrap();
    let admin_store = JsonFileStore::open(dir.path().join("admin.json")).unwrap();
    let first = printlink_receiver::load_or_create_identity(&admin_store).unwrap();
    drop(admin_store);
    let admin_store = JsonFileStore::open(dir.path().join("admin.json")).unwrap();
    let admin_id = printlink_receiver::load_or_create_identity(&admin_store).unwrap();
    assert_eq!(first, admin_id);
    assert_eq!(admin_store.get("admin_id").as_deref(), Some(admin_id.as_str()));

    let network = MemoryNetwork::new();
    let receiver = printlink_receiver::ReceiverEngine::new(
        network.bind(admin_id.clone()).unwrap(),
        Arc::new(printlink_e2e::RecordingPrinter::default()),
        ReceiverConfig::default(),
    );
    receiver.start().unwrap();

    let customer_store = Arc::new(printlink_store::MemoryStore::new());
    customer_store
        .set(printlink_store::keys::LAST_ADMIN, admin_id.as_str())
        .unwrap();
    let sender = printlink_sender::SenderEngine::new(
        network.bind_ephemeral(),
        customer_store,
        SenderConfig::default(),
    );
    sender.enqueue_files([SourceFile::from_bytes("again.pdf", pattern(10))]);

    assert!(sender.auto_connect().await.unwrap());
    assert_eq!(sender.peer(), Some(admin_id));
    let peer = sender.identity().clone();
    eventually("replayed announcement", || {
        receiver
            .customer(&peer)
            .is_some_and(|c| c.files.len() == 1)
    })
    .await;
}
