//! Packet encoding stage.
//!
//! A pure transform between `(FaceId, Bytes)` frames below and
//! `(FaceId, Packet)` envelopes above. Frames that fail to decode are
//! logged at warn and dropped; nothing malformed crosses the stage
//! boundary.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use rust_icnd_common::metrics::ForwarderMetrics;
use std::sync::Arc;

use crate::codec::PacketCodec;
use crate::stage::{FrameRx, FrameTx, PacketRx, PacketTx, Stage, StopSignal};

pub struct PacketEncodingLayer {
    codec: Arc<dyn PacketCodec>,
    metrics: Arc<ForwarderMetrics>,

    pub queue_from_lower: Option<FrameRx>,
    pub queue_to_lower: Option<FrameTx>,
    pub queue_from_higher: Option<PacketRx>,
    pub queue_to_higher: Option<PacketTx>,

    stop: StopSignal,
}

impl PacketEncodingLayer {
    pub fn new(codec: Arc<dyn PacketCodec>, metrics: Arc<ForwarderMetrics>) -> Self {
        Self {
            codec,
            metrics,
            queue_from_lower: None,
            queue_to_lower: None,
            queue_from_higher: None,
            queue_to_higher: None,
            stop: StopSignal::new(),
        }
    }
}

#[async_trait]
impl Stage for PacketEncodingLayer {
    fn name(&self) -> &'static str {
        "encoding"
    }

    async fn start(&mut self) -> Result<()> {
        if self.stop.is_running() {
            return Ok(());
        }
        let mut from_lower = self
            .queue_from_lower
            .take()
            .context("encoding layer started without a lower input queue")?;
        let to_lower = self
            .queue_to_lower
            .take()
            .context("encoding layer started without a lower output queue")?;
        let mut from_higher = self
            .queue_from_higher
            .take()
            .context("encoding layer started without a higher input queue")?;
        let to_higher = self
            .queue_to_higher
            .take()
            .context("encoding layer started without a higher output queue")?;

        let codec = Arc::clone(&self.codec);
        let metrics = Arc::clone(&self.metrics);
        let mut stop = self.stop.subscribe();

        self.stop.register(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    frame = from_lower.recv() => {
                        let Some((fid, bytes)) = frame else { break };
                        match codec.decode(&bytes) {
                            Ok(packet) => {
                                if to_higher.send((fid, packet)).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                warn!("dropping undecodable frame from {fid}: {err}");
                                metrics.packets_dropped.increment();
                            }
                        }
                    }
                    envelope = from_higher.recv() => {
                        let Some((fid, packet)) = envelope else { break };
                        match codec.encode(&packet) {
                            Ok(bytes) => {
                                if to_lower.send((fid, bytes)).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => {
                                warn!(
                                    "dropping unencodable {} for {fid}: {err}",
                                    packet.packet_type()
                                );
                                metrics.packets_dropped.increment();
                            }
                        }
                    }
                }
            }
            debug!("encoding worker exited");
        }));
        Ok(())
    }

    async fn stop(&mut self) {
        self.stop.stop().await;
    }
}
