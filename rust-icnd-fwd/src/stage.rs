//! Pipeline plumbing.
//!
//! Stages communicate exclusively through bounded mpsc queues carrying
//! `(FaceId, Packet)` envelopes (or `(FaceId, Bytes)` below the encoding
//! layer) and never share mutable memory directly. Each stage owns one
//! worker task; [`StopSignal`] requests an orderly exit and joins it.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use rust_icnd_common::{packet::Packet, types::FaceId};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::DEFAULT_QUEUE_DEPTH;

/// Envelope travelling between the encoding layer and everything above it.
pub type PacketEnvelope = (FaceId, Packet);
/// Envelope travelling between the link layer and the encoding layer.
pub type FrameEnvelope = (FaceId, Bytes);

pub type PacketTx = mpsc::Sender<PacketEnvelope>;
pub type PacketRx = mpsc::Receiver<PacketEnvelope>;
pub type FrameTx = mpsc::Sender<FrameEnvelope>;
pub type FrameRx = mpsc::Receiver<FrameEnvelope>;

/// A bounded queue pair connecting two adjacent stages.
pub fn packet_queue() -> (PacketTx, PacketRx) {
    mpsc::channel(DEFAULT_QUEUE_DEPTH)
}

pub fn frame_queue() -> (FrameTx, FrameRx) {
    mpsc::channel(DEFAULT_QUEUE_DEPTH)
}

/// A pipeline stage: an independent worker with its own queues.
///
/// `start` spawns the worker; `stop` signals it to exit after the packet
/// in flight and joins it. Both are idempotent.
#[async_trait]
pub trait Stage: Send {
    fn name(&self) -> &'static str;

    async fn start(&mut self) -> Result<()>;

    async fn stop(&mut self);
}

/// Cooperative shutdown for stage workers.
///
/// Workers hold a [`watch::Receiver`] and exit when the flag flips; the
/// owning stage keeps the sender plus the worker handles.
#[derive(Debug)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            tx,
            handles: Vec::new(),
        }
    }

    /// A receiver to select on inside a worker loop.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Track a spawned worker so `stop` can join it.
    pub fn register(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Signal all workers and wait for them to exit. Idempotent.
    pub async fn stop(&mut self) {
        let _ = self.tx.send(true);
        let handles = std::mem::take(&mut self.handles);
        for result in join_all(handles).await {
            if let Err(err) = result {
                if !err.is_cancelled() {
                    log::warn!("stage worker panicked: {err}");
                }
            }
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Receive from an optional queue; a stage without that queue attached
/// simply never yields from this branch.
pub async fn recv_optional<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Wait for either a stop request or the next message on `rx`.
///
/// Returns `None` when the stage should exit (stop requested or the
/// upstream sender is gone).
pub async fn recv_or_stop<T>(
    rx: &mut mpsc::Receiver<T>,
    stop: &mut watch::Receiver<bool>,
) -> Option<T> {
    tokio::select! {
        _ = stop.changed() => None,
        msg = rx.recv() => msg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn stop_signal_joins_workers_idempotently() {
        let mut stop = StopSignal::new();
        let mut rx = stop.subscribe();
        stop.register(tokio::spawn(async move {
            let _ = rx.changed().await;
        }));
        assert!(stop.is_running());
        stop.stop().await;
        assert!(!stop.is_running());
        // a second stop is a no-op
        stop.stop().await;
    }

    #[tokio::test]
    async fn recv_or_stop_prefers_messages_until_stopped() {
        let (tx, mut rx) = mpsc::channel::<u32>(4);
        let stop = StopSignal::new();
        let mut stop_rx = stop.subscribe();

        tx.send(7).await.unwrap();
        assert_eq!(recv_or_stop(&mut rx, &mut stop_rx).await, Some(7));

        drop(tx);
        assert_eq!(recv_or_stop(&mut rx, &mut stop_rx).await, None);
    }

    #[tokio::test]
    async fn recv_or_stop_exits_on_stop() {
        let (_tx, mut rx) = mpsc::channel::<u32>(4);
        let stop = StopSignal::new();
        let mut stop_rx = stop.subscribe();
        let waiter = tokio::spawn(async move { recv_or_stop(&mut rx, &mut stop_rx).await });
        // give the waiter a chance to park on the select
        tokio::time::sleep(Duration::from_millis(10)).await;
        let mut stop = stop;
        stop.stop().await;
        assert_eq!(waiter.await.unwrap(), None);
    }
}
