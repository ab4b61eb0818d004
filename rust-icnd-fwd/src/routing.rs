//! Routing stage: ingests distance-vector route updates into the RIB and
//! periodically compiles it into the FIB.
//!
//! No advertisement wire format is specified for the distance vectors,
//! so updates arrive over an in-process channel; configuration seeding
//! and a management channel publish into the same sender.

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use rust_icnd_common::{name::Name, types::FaceId};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::rib::Rib;
use crate::stage::{Stage, StopSignal};
use crate::tables::SharedFib;
use crate::{DEFAULT_QUEUE_DEPTH, DEFAULT_ROUTE_LIFETIME_SECS};

/// A learned route heading for the RIB.
#[derive(Debug, Clone)]
pub struct RouteUpdate {
    pub name: Name,
    pub face: FaceId,
    pub distance: u32,
    pub lifetime: Duration,
}

impl RouteUpdate {
    pub fn new(name: Name, face: FaceId, distance: u32) -> Self {
        Self {
            name,
            face,
            distance,
            lifetime: Duration::from_secs(DEFAULT_ROUTE_LIFETIME_SECS),
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }
}

/// Owns the RIB; ages it and replaces the FIB's non-static entries on a
/// periodic tick.
pub struct RoutingLayer {
    rib: Arc<Mutex<Rib>>,
    fib: SharedFib,
    compile_interval: Duration,
    updates_tx: mpsc::Sender<RouteUpdate>,
    updates_rx: Option<mpsc::Receiver<RouteUpdate>>,
    stop: StopSignal,
}

impl RoutingLayer {
    pub fn new(fib: SharedFib, shortest_only: bool, compile_interval: Duration) -> Self {
        let (updates_tx, updates_rx) = mpsc::channel(DEFAULT_QUEUE_DEPTH);
        Self {
            rib: Arc::new(Mutex::new(Rib::new(shortest_only))),
            fib,
            compile_interval,
            updates_tx,
            updates_rx: Some(updates_rx),
            stop: StopSignal::new(),
        }
    }

    /// Sender half for publishing route updates into this stage.
    pub fn updates(&self) -> mpsc::Sender<RouteUpdate> {
        self.updates_tx.clone()
    }

    pub fn rib(&self) -> Arc<Mutex<Rib>> {
        Arc::clone(&self.rib)
    }
}

#[async_trait]
impl Stage for RoutingLayer {
    fn name(&self) -> &'static str {
        "routing"
    }

    async fn start(&mut self) -> Result<()> {
        if self.stop.is_running() {
            return Ok(());
        }
        let mut updates = self
            .updates_rx
            .take()
            .expect("routing layer started twice");
        let rib = Arc::clone(&self.rib);
        let fib = Arc::clone(&self.fib);
        let interval = self.compile_interval;
        let mut stop = self.stop.subscribe();

        self.stop.register(tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    update = updates.recv() => {
                        let Some(update) = update else { break };
                        info!(
                            "route update: {} via {} distance {}",
                            update.name, update.face, update.distance
                        );
                        rib.lock().unwrap().insert(
                            &update.name,
                            update.face,
                            update.distance,
                            Instant::now() + update.lifetime,
                        );
                    }
                    _ = tick.tick() => {
                        // age first so expired routes never reach the FIB
                        let mut rib = rib.lock().unwrap();
                        rib.age(Instant::now());
                        let mut fib = fib.lock().unwrap();
                        rib.build_fib(&mut fib);
                    }
                }
            }
            debug!("routing worker exited");
        }));
        Ok(())
    }

    async fn stop(&mut self) {
        self.stop.stop().await;
    }
}
