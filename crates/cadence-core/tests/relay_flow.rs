//! End-to-end relay flow: rendezvous, connect, stream, persist.
//!
//! Plays the roles of a relay daemon and a sending simulator in one
//! process: the relay binds and publishes its address, the simulator
//! discovers it through the handshake, streams windowed payloads, and the
//! batch files on disk must equal what was sent.

use cadence_core::channel::{ChannelListener, DataChannel, Message};
use cadence_core::handshake::{self, WaitOptions};
use cadence_core::storage::{batch_path, read_batch, FileBatchSink};
use cadence_core::translator::{TranslatorConfig, TranslatorEngine};
use std::time::Duration;
use tempfile::TempDir;

fn fast_wait() -> WaitOptions {
    WaitOptions {
        poll_interval: Duration::from_millis(5),
        ..WaitOptions::default()
    }
}

#[tokio::test]
async fn relay_run_end_to_end() {
    let run_dir = TempDir::new().unwrap();
    let endpoint_file = run_dir.path().join("relay/recorder/7.txt");
    let save_stem = run_dir.path().join("relay/save/7");

    let listener = ChannelListener::bind().await.unwrap();
    handshake::publish(&endpoint_file, listener.address()).unwrap();

    // The sending simulator discovers the address and streams 5 windows
    // of 4 values each.
    let sender_endpoint = endpoint_file.clone();
    let sender = tokio::spawn(async move {
        let address = handshake::await_and_consume(&sender_endpoint, &fast_wait())
            .await
            .unwrap();
        let mut channel = DataChannel::connect(&address).await.unwrap();
        for window in 0..5u64 {
            let payload: Vec<f64> = (0..4).map(|i| (window * 4 + i) as f64).collect();
            channel.send(&Message::Data(payload)).await.unwrap();
            channel.send(&Message::EndOfWindow).await.unwrap();
        }
        channel.send(&Message::EndOfStream).await.unwrap();
    });

    let peers = listener.accept_ranks(1).await.unwrap();
    let engine = TranslatorEngine::new(
        TranslatorConfig {
            nb_step: 5,
            save_step: 2,
        },
        FileBatchSink::new(&save_stem),
    )
    .unwrap();
    let report = engine.run(peers).await.unwrap();
    sender.await.unwrap();

    assert_eq!(report.windows, 5);
    assert_eq!(report.batches, 3);
    assert!(!report.stopped_early);

    // Batches land after windows 2 and 4, plus the final partial window 5.
    let mut all = Vec::new();
    for count in [2u64, 4, 5] {
        all.extend(read_batch(&batch_path(&save_stem, count)).unwrap());
    }
    let expected: Vec<f64> = (0..20).map(|i| i as f64).collect();
    assert_eq!(all, expected);

    // The handshake marker was consumed exactly once.
    assert!(!handshake::marker_path(&endpoint_file).exists());
    assert!(endpoint_file.exists());
}

#[tokio::test]
async fn relay_survives_simulator_crash_mid_stream() {
    let run_dir = TempDir::new().unwrap();
    let endpoint_file = run_dir.path().join("relay/recorder/4.txt");
    let save_stem = run_dir.path().join("relay/save/4");

    let listener = ChannelListener::bind().await.unwrap();
    handshake::publish(&endpoint_file, listener.address()).unwrap();

    let sender_endpoint = endpoint_file.clone();
    let sender = tokio::spawn(async move {
        let address = handshake::await_and_consume(&sender_endpoint, &fast_wait())
            .await
            .unwrap();
        let mut channel = DataChannel::connect(&address).await.unwrap();
        for window in 0..3u64 {
            channel
                .send(&Message::Data(vec![window as f64]))
                .await
                .unwrap();
            channel.send(&Message::EndOfWindow).await.unwrap();
        }
        // Dropped without EndOfStream: the connection just dies.
    });

    let peers = listener.accept_ranks(1).await.unwrap();
    let engine = TranslatorEngine::new(
        TranslatorConfig {
            nb_step: 10,
            save_step: 4,
        },
        FileBatchSink::new(&save_stem),
    )
    .unwrap();
    let report = engine.run(peers).await.unwrap();
    sender.await.unwrap();

    // The disconnect reads as end of stream; the partial batch is flushed.
    assert_eq!(report.windows, 3);
    assert!(report.stopped_early);
    assert_eq!(
        read_batch(&batch_path(&save_stem, 3)).unwrap(),
        vec![0.0, 1.0, 2.0]
    );
}
