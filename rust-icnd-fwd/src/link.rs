//! UDP/IPv4 link layer.
//!
//! Owns the socket and the face table, translating between raw datagrams
//! and `(FaceId, Bytes)` envelopes. The socket is mutated only from the
//! stage worker, with one exception: enabling broadcast is a one-time
//! operation performed before the worker starts consuming.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, trace, warn};
use rust_icnd_common::metrics::ForwarderMetrics;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;

use crate::face::{shared_face_table, SharedFaceTable};
use crate::stage::{FrameRx, FrameTx, Stage, StopSignal};
use crate::MAX_DATAGRAM_SIZE;

/// Shared view of a link layer: everything the autoconfig stages need
/// without owning the stage itself.
#[derive(Clone)]
pub struct LinkHandle {
    socket: Arc<UdpSocket>,
    faces: SharedFaceTable,
    local_addr: SocketAddr,
    broadcast_enables: Arc<AtomicUsize>,
}

impl LinkHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn face_table(&self) -> SharedFaceTable {
        Arc::clone(&self.faces)
    }

    /// Enable SO_BROADCAST on the socket. Called once at startup, before
    /// the worker begins consuming.
    pub fn enable_broadcast(&self) -> Result<()> {
        self.socket
            .set_broadcast(true)
            .context("failed to enable broadcast on link socket")?;
        self.broadcast_enables.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// How many times broadcast was enabled on this socket.
    pub fn broadcast_enable_count(&self) -> usize {
        self.broadcast_enables.load(Ordering::SeqCst)
    }
}

/// The bottom pipeline stage: a bound UDP socket plus the face table.
pub struct UdpLinkLayer {
    socket: Arc<UdpSocket>,
    faces: SharedFaceTable,
    local_addr: SocketAddr,
    broadcast_enables: Arc<AtomicUsize>,
    metrics: Arc<ForwarderMetrics>,

    pub queue_to_higher: Option<FrameTx>,
    pub queue_from_higher: Option<FrameRx>,

    stop: StopSignal,
}

impl UdpLinkLayer {
    /// Bind the link socket. Failing to bind is fatal at startup.
    pub async fn bind(listen_addr: &str, metrics: Arc<ForwarderMetrics>) -> Result<Self> {
        let socket = UdpSocket::bind(listen_addr)
            .await
            .with_context(|| format!("failed to bind link socket on {listen_addr}"))?;
        let local_addr = socket.local_addr()?;
        debug!("link layer bound on {local_addr}");
        Ok(Self {
            socket: Arc::new(socket),
            faces: shared_face_table(),
            local_addr,
            broadcast_enables: Arc::new(AtomicUsize::new(0)),
            metrics,
            queue_to_higher: None,
            queue_from_higher: None,
            stop: StopSignal::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn face_table(&self) -> SharedFaceTable {
        Arc::clone(&self.faces)
    }

    /// A cloneable view for stages that interact with the link without
    /// owning it.
    pub fn handle(&self) -> LinkHandle {
        LinkHandle {
            socket: Arc::clone(&self.socket),
            faces: Arc::clone(&self.faces),
            local_addr: self.local_addr,
            broadcast_enables: Arc::clone(&self.broadcast_enables),
        }
    }

    /// See [`LinkHandle::enable_broadcast`].
    pub fn enable_broadcast(&self) -> Result<()> {
        self.handle().enable_broadcast()
    }

    pub fn broadcast_enable_count(&self) -> usize {
        self.broadcast_enables.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for UdpLinkLayer {
    fn name(&self) -> &'static str {
        "link"
    }

    async fn start(&mut self) -> Result<()> {
        if self.stop.is_running() {
            return Ok(());
        }
        let to_higher = self
            .queue_to_higher
            .take()
            .context("link layer started without an upward queue")?;
        let mut from_higher = self
            .queue_from_higher
            .take()
            .context("link layer started without a downward queue")?;

        let socket = Arc::clone(&self.socket);
        let faces = Arc::clone(&self.faces);
        let metrics = Arc::clone(&self.metrics);
        let mut stop = self.stop.subscribe();

        self.stop.register(tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    received = socket.recv_from(&mut buf) => {
                        match received {
                            Ok((len, peer)) => {
                                let fid = faces.lock().unwrap().get_or_create(peer, false);
                                metrics.bytes_received.add(len as u64);
                                trace!("link: {len} bytes from {peer} ({fid})");
                                if to_higher
                                    .send((fid, Bytes::copy_from_slice(&buf[..len])))
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            Err(err) => {
                                // transport errors never touch table state
                                warn!("link receive error: {err}");
                            }
                        }
                    }
                    frame = from_higher.recv() => {
                        let Some((fid, bytes)) = frame else { break };
                        let addr = faces.lock().unwrap().address(fid);
                        match addr {
                            Some(addr) => {
                                trace!("link: {} bytes to {addr} ({fid})", bytes.len());
                                match socket.send_to(&bytes, addr).await {
                                    Ok(sent) => metrics.bytes_sent.add(sent as u64),
                                    Err(err) => warn!("link send to {addr} failed: {err}"),
                                }
                            }
                            None => {
                                warn!("link: dropping frame for unknown {fid}");
                                metrics.packets_dropped.increment();
                            }
                        }
                    }
                }
            }
            debug!("link worker exited");
        }));
        Ok(())
    }

    async fn stop(&mut self) {
        self.stop.stop().await;
    }
}
