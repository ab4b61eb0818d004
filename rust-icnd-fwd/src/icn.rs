//! ICN forwarding stage.
//!
//! Owns the CS, PIT and FIB and implements the forwarding state machine
//! for Interest, Content and Nack, plus the periodic table aging tick.
//! Packets under the `/autoconfig` hierarchy bypass normal forwarding and
//! are exchanged verbatim with the stage above; autoconfig and regular
//! traffic are handled mutually exclusively.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, trace, warn};
use rust_icnd_common::{
    metrics::ForwarderMetrics,
    name::Name,
    packet::{Content, Interest, Nack, NackReason, Packet},
    types::FaceId,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::autoconfig::is_autoconfig_name;
use crate::stage::{recv_optional, PacketRx, PacketTx, Stage, StopSignal};
use crate::tables::{SharedContentStore, SharedFib, SharedPit};

/// Where a packet handled by the stage came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Lower,
    Higher,
}

pub struct IcnLayer {
    cs: SharedContentStore,
    pit: SharedPit,
    fib: SharedFib,
    ageing_interval: Duration,
    metrics: Arc<ForwarderMetrics>,

    pub queue_from_lower: Option<PacketRx>,
    pub queue_to_lower: Option<PacketTx>,
    pub queue_from_higher: Option<PacketRx>,
    pub queue_to_higher: Option<PacketTx>,

    stop: StopSignal,
}

impl IcnLayer {
    pub fn new(
        cs: SharedContentStore,
        pit: SharedPit,
        fib: SharedFib,
        ageing_interval: Duration,
        metrics: Arc<ForwarderMetrics>,
    ) -> Self {
        Self {
            cs,
            pit,
            fib,
            ageing_interval,
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
impl Stage for IcnLayer {
    fn name(&self) -> &'static str {
        "icn"
    }

    async fn start(&mut self) -> Result<()> {
        if self.stop.is_running() {
            return Ok(());
        }
        let mut from_lower = self
            .queue_from_lower
            .take()
            .context("icn layer started without a lower input queue")?;
        let to_lower = self
            .queue_to_lower
            .take()
            .context("icn layer started without a lower output queue")?;
        let mut from_higher = self.queue_from_higher.take();
        let to_higher = self.queue_to_higher.take();

        let mut worker = Worker {
            cs: Arc::clone(&self.cs),
            pit: Arc::clone(&self.pit),
            fib: Arc::clone(&self.fib),
            to_lower,
            to_higher,
            metrics: Arc::clone(&self.metrics),
        };
        let ageing_interval = self.ageing_interval;
        let mut stop = self.stop.subscribe();

        self.stop.register(tokio::spawn(async move {
            let mut tick = tokio::time::interval(ageing_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    envelope = from_lower.recv() => {
                        let Some((fid, packet)) = envelope else { break };
                        worker.handle(fid, packet, Side::Lower).await;
                    }
                    envelope = recv_optional(&mut from_higher) => {
                        match envelope {
                            Some((fid, packet)) => worker.handle(fid, packet, Side::Higher).await,
                            None => from_higher = None,
                        }
                    }
                    _ = tick.tick() => worker.age(Instant::now()).await,
                }
            }
            debug!("icn worker exited");
        }));
        Ok(())
    }

    async fn stop(&mut self) {
        self.stop.stop().await;
    }
}

struct Worker {
    cs: SharedContentStore,
    pit: SharedPit,
    fib: SharedFib,
    to_lower: PacketTx,
    to_higher: Option<PacketTx>,
    metrics: Arc<ForwarderMetrics>,
}

impl Worker {
    async fn handle(&mut self, fid: FaceId, packet: Packet, side: Side) {
        // autoconfig traffic bypasses the tables entirely: upward from
        // the network when an autoconfig stage is attached, downward
        // verbatim from it
        if self.to_higher.is_some() && is_autoconfig_name(packet.name()) {
            match side {
                Side::Lower => self.send_higher(fid, packet).await,
                Side::Higher => self.send_lower(fid, packet).await,
            }
            return;
        }

        match packet {
            Packet::Interest(interest) => {
                self.handle_interest(fid, interest, side == Side::Higher)
                    .await
            }
            Packet::Content(content) => self.handle_content(content).await,
            Packet::Nack(nack) => self.handle_nack(nack).await,
        }
    }

    /// Interest state machine: CS hit, PIT aggregation, FIB forward, or
    /// NACK(NO_ROUTE).
    async fn handle_interest(&mut self, fid: FaceId, interest: Interest, from_local: bool) {
        self.metrics.interests_received.increment();
        let name = interest.name.clone();

        // 1. content store
        let cached = {
            let mut cs = self.cs.lock().unwrap();
            let hit = cs.find(&name).map(|entry| entry.content.clone());
            if hit.is_some() {
                cs.touch(&name);
            }
            hit
        };
        if let Some(content) = cached {
            trace!("cs hit for {name}");
            self.dispatch(fid, Packet::Content(content), from_local).await;
            return;
        }

        // 2. pending interest aggregation
        let suppressed = {
            let mut pit = self.pit.lock().unwrap();
            if pit.find(&name).is_some() {
                pit.append_incoming(&name, incoming_face(fid, from_local));
                true
            } else {
                false
            }
        };
        if suppressed {
            trace!("interest for {name} aggregated onto pending entry");
            self.metrics.interests_suppressed.increment();
            return;
        }

        // 3. route lookup
        let next_hop = self.fib.lock().unwrap().find_longest_prefix(&name);
        let Some(route) = next_hop else {
            debug!("no route for {name}");
            let nack = Nack::new(name, NackReason::NoRoute).with_interest(interest);
            self.dispatch(fid, Packet::Nack(nack), from_local).await;
            return;
        };

        // 4. forward; an Interest may go back out the face it came from
        self.pit.lock().unwrap().add_interest(
            name.clone(),
            incoming_face(fid, from_local),
            route.face,
            from_local,
        );
        trace!("forwarding interest for {name} to {}", route.face);
        self.metrics.interests_forwarded.increment();
        self.send_lower(route.face, Packet::Interest(interest)).await;
    }

    /// Returning Content consumes the PIT entry and fans out to every
    /// incoming face; unsolicited Content is dropped.
    async fn handle_content(&mut self, content: Content) {
        self.metrics.content_received.increment();
        let entry = self.pit.lock().unwrap().remove(&content.name);
        let Some(entry) = entry else {
            debug!("unsolicited content for {}, dropped", content.name);
            self.metrics.unsolicited_content.increment();
            return;
        };
        for face in &entry.incoming {
            self.metrics.content_delivered.increment();
            self.dispatch(*face, Packet::Content(content.clone()), face.is_local())
                .await;
        }
        self.cs.lock().unwrap().insert(content, false);
    }

    /// A Nack consumes the PIT entry and propagates to every incoming
    /// face with the original Interest preserved.
    async fn handle_nack(&mut self, nack: Nack) {
        self.metrics.nacks_received.increment();
        let entry = self.pit.lock().unwrap().remove(&nack.name);
        let Some(entry) = entry else {
            debug!("nack for unknown {}, dropped", nack.name);
            return;
        };
        let interest = nack
            .interest
            .clone()
            .unwrap_or_else(|| Interest::new(nack.name.clone()));
        for face in &entry.incoming {
            let nack = Nack::new(nack.name.clone(), nack.reason).with_interest(interest.clone());
            self.metrics.nacks_sent.increment();
            self.dispatch(*face, Packet::Nack(nack), face.is_local()).await;
        }
    }

    /// Periodic table maintenance: expired PIT entries answer their
    /// incoming faces with NACK(NO_CONTENT).
    async fn age(&mut self, now: Instant) {
        self.cs.lock().unwrap().age(now);
        let expired = self.pit.lock().unwrap().age(now);
        for entry in expired {
            debug!("pending interest for {} timed out", entry.name);
            for face in &entry.incoming {
                let nack = Nack::new(entry.name.clone(), NackReason::NoContent)
                    .with_interest(Interest::new(entry.name.clone()));
                self.metrics.nacks_sent.increment();
                self.dispatch(*face, Packet::Nack(nack), face.is_local()).await;
            }
        }
    }

    /// Send a reply towards where the request came from.
    async fn dispatch(&mut self, fid: FaceId, packet: Packet, local: bool) {
        if local {
            self.send_higher(fid, packet).await;
        } else {
            self.send_lower(fid, packet).await;
        }
    }

    async fn send_lower(&mut self, fid: FaceId, packet: Packet) {
        if self.to_lower.send((fid, packet)).await.is_err() {
            warn!("icn: lower queue closed");
        }
    }

    async fn send_higher(&mut self, fid: FaceId, packet: Packet) {
        match &self.to_higher {
            Some(tx) => {
                if tx.send((fid, packet)).await.is_err() {
                    warn!("icn: higher queue closed");
                }
            }
            None => {
                warn!("icn: dropping packet for the application, no higher stage");
                self.metrics.packets_dropped.increment();
            }
        }
    }
}

/// The face recorded in the PIT for a request: the local marker for
/// application-originated Interests, the network face otherwise.
fn incoming_face(fid: FaceId, from_local: bool) -> FaceId {
    if from_local {
        rust_icnd_common::types::FACE_LOCAL
    } else {
        fid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::{packet_queue, PacketEnvelope};
    use crate::tables::{ContentStore, Fib, Pit};
    use rust_icnd_common::types::FACE_LOCAL;
    use std::sync::Mutex;
    use tokio::time::timeout;

    struct Harness {
        layer: IcnLayer,
        lower_in: PacketTx,
        lower_out: PacketRx,
        higher_in: Option<PacketTx>,
        higher_out: Option<PacketRx>,
        cs: SharedContentStore,
        pit: SharedPit,
        fib: SharedFib,
    }

    async fn harness(with_higher: bool, ageing: Duration, pit_ttl: Duration) -> Harness {
        let metrics = Arc::new(ForwarderMetrics::new());
        let cs: SharedContentStore = Arc::new(Mutex::new(ContentStore::new(
            64,
            Duration::from_secs(4),
            Arc::clone(&metrics),
        )));
        let pit: SharedPit = Arc::new(Mutex::new(Pit::new(pit_ttl, Arc::clone(&metrics))));
        let fib: SharedFib = Arc::new(Mutex::new(Fib::new(Arc::clone(&metrics))));

        let mut layer = IcnLayer::new(
            Arc::clone(&cs),
            Arc::clone(&pit),
            Arc::clone(&fib),
            ageing,
            metrics,
        );
        let (lower_in_tx, lower_in_rx) = packet_queue();
        let (lower_out_tx, lower_out_rx) = packet_queue();
        layer.queue_from_lower = Some(lower_in_rx);
        layer.queue_to_lower = Some(lower_out_tx);

        let (higher_in, higher_out) = if with_higher {
            let (higher_in_tx, higher_in_rx) = packet_queue();
            let (higher_out_tx, higher_out_rx) = packet_queue();
            layer.queue_from_higher = Some(higher_in_rx);
            layer.queue_to_higher = Some(higher_out_tx);
            (Some(higher_in_tx), Some(higher_out_rx))
        } else {
            (None, None)
        };

        layer.start().await.unwrap();
        Harness {
            layer,
            lower_in: lower_in_tx,
            lower_out: lower_out_rx,
            higher_in,
            higher_out,
            cs,
            pit,
            fib,
        }
    }

    async fn recv(rx: &mut PacketRx) -> PacketEnvelope {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a packet")
            .expect("queue closed")
    }

    fn interest(name: &str) -> Packet {
        Interest::new(Name::from_string(name)).into()
    }

    #[tokio::test]
    async fn cs_hit_answers_from_cache() {
        let mut h = harness(false, Duration::from_secs(60), Duration::from_secs(60)).await;
        h.cs.lock()
            .unwrap()
            .insert(Content::new(Name::from_string("/x"), "cached"), false);

        h.lower_in.send((FaceId(2), interest("/x"))).await.unwrap();
        let (fid, packet) = recv(&mut h.lower_out).await;
        assert_eq!(fid, FaceId(2));
        assert_eq!(
            packet,
            Packet::Content(Content::new(Name::from_string("/x"), "cached"))
        );
        // nothing became pending
        assert!(h.pit.lock().unwrap().is_empty());
        h.layer.stop().await;
    }

    #[tokio::test]
    async fn no_route_yields_nack() {
        let mut h = harness(false, Duration::from_secs(60), Duration::from_secs(60)).await;
        h.lower_in.send((FaceId(2), interest("/x"))).await.unwrap();
        let (fid, packet) = recv(&mut h.lower_out).await;
        assert_eq!(fid, FaceId(2));
        match packet {
            Packet::Nack(nack) => {
                assert_eq!(nack.reason, NackReason::NoRoute);
                assert_eq!(nack.name, Name::from_string("/x"));
                assert_eq!(
                    nack.interest.unwrap(),
                    Interest::new(Name::from_string("/x"))
                );
            }
            other => panic!("expected Nack, got {}", other.packet_type()),
        }
        h.layer.stop().await;
    }

    #[tokio::test]
    async fn pit_aggregation_forwards_once_and_fans_out() {
        let mut h = harness(false, Duration::from_secs(60), Duration::from_secs(60)).await;
        h.fib
            .lock()
            .unwrap()
            .insert(Name::from_string("/x"), FaceId(9), false);

        // two Interests from different faces, before any Content returns
        h.lower_in.send((FaceId(2), interest("/x"))).await.unwrap();
        h.lower_in.send((FaceId(3), interest("/x"))).await.unwrap();

        // exactly one Interest goes downstream
        let (fid, packet) = recv(&mut h.lower_out).await;
        assert_eq!(fid, FaceId(9));
        assert_eq!(packet, interest("/x"));

        // the content fans out to both requesters
        h.lower_in
            .send((
                FaceId(9),
                Content::new(Name::from_string("/x"), "payload").into(),
            ))
            .await
            .unwrap();
        let (fid_a, packet_a) = recv(&mut h.lower_out).await;
        let (fid_b, packet_b) = recv(&mut h.lower_out).await;
        assert_eq!(
            {
                let mut fids = vec![fid_a, fid_b];
                fids.sort();
                fids
            },
            vec![FaceId(2), FaceId(3)]
        );
        assert_eq!(packet_a, packet_b);

        // the PIT entry is consumed and the CS now caches the content
        assert!(h.pit.lock().unwrap().is_empty());
        assert!(h
            .cs
            .lock()
            .unwrap()
            .find(&Name::from_string("/x"))
            .is_some());

        // no further Interest left the stage
        assert!(
            timeout(Duration::from_millis(200), h.lower_out.recv())
                .await
                .is_err()
        );
        h.layer.stop().await;
    }

    #[tokio::test]
    async fn interest_may_return_out_its_incoming_face() {
        let mut h = harness(false, Duration::from_secs(60), Duration::from_secs(60)).await;
        h.fib
            .lock()
            .unwrap()
            .insert(Name::from_string("/x"), FaceId(2), false);
        h.lower_in.send((FaceId(2), interest("/x"))).await.unwrap();
        let (fid, packet) = recv(&mut h.lower_out).await;
        assert_eq!(fid, FaceId(2));
        assert_eq!(packet, interest("/x"));
        h.layer.stop().await;
    }

    #[tokio::test]
    async fn unsolicited_content_is_dropped() {
        let mut h = harness(false, Duration::from_secs(60), Duration::from_secs(60)).await;
        h.lower_in
            .send((
                FaceId(4),
                Content::new(Name::from_string("/nobody/asked"), "x").into(),
            ))
            .await
            .unwrap();
        assert!(
            timeout(Duration::from_millis(200), h.lower_out.recv())
                .await
                .is_err()
        );
        assert!(h
            .cs
            .lock()
            .unwrap()
            .find(&Name::from_string("/nobody/asked"))
            .is_none());
        h.layer.stop().await;
    }

    #[tokio::test]
    async fn nack_propagates_to_requesters() {
        let mut h = harness(false, Duration::from_secs(60), Duration::from_secs(60)).await;
        h.fib
            .lock()
            .unwrap()
            .insert(Name::from_string("/x"), FaceId(9), false);
        h.lower_in.send((FaceId(2), interest("/x"))).await.unwrap();
        let _ = recv(&mut h.lower_out).await;

        h.lower_in
            .send((
                FaceId(9),
                Nack::new(Name::from_string("/x"), NackReason::NoContent)
                    .with_interest(Interest::new(Name::from_string("/x")))
                    .into(),
            ))
            .await
            .unwrap();
        let (fid, packet) = recv(&mut h.lower_out).await;
        assert_eq!(fid, FaceId(2));
        match packet {
            Packet::Nack(nack) => {
                assert_eq!(nack.reason, NackReason::NoContent);
                assert!(nack.interest.is_some());
            }
            other => panic!("expected Nack, got {}", other.packet_type()),
        }
        assert!(h.pit.lock().unwrap().is_empty());
        h.layer.stop().await;
    }

    #[tokio::test]
    async fn aged_out_interest_nacks_no_content() {
        let mut h = harness(
            false,
            Duration::from_millis(100),
            Duration::from_millis(300),
        )
        .await;
        h.fib
            .lock()
            .unwrap()
            .insert(Name::from_string("/x"), FaceId(9), false);
        h.lower_in.send((FaceId(2), interest("/x"))).await.unwrap();
        let _ = recv(&mut h.lower_out).await;

        // nobody answers; the PIT TTL runs out
        let (fid, packet) = recv(&mut h.lower_out).await;
        assert_eq!(fid, FaceId(2));
        match packet {
            Packet::Nack(nack) => assert_eq!(nack.reason, NackReason::NoContent),
            other => panic!("expected Nack, got {}", other.packet_type()),
        }
        assert!(h.pit.lock().unwrap().is_empty());
        h.layer.stop().await;
    }

    #[tokio::test]
    async fn autoconfig_traffic_bypasses_tables() {
        let mut h = harness(true, Duration::from_secs(60), Duration::from_secs(60)).await;

        // upward, untouched
        h.lower_in
            .send((FaceId(7), interest("/autoconfig/forwarders")))
            .await
            .unwrap();
        let (fid, packet) = recv(h.higher_out.as_mut().unwrap()).await;
        assert_eq!(fid, FaceId(7));
        assert_eq!(packet, interest("/autoconfig/forwarders"));
        assert!(h.pit.lock().unwrap().is_empty());

        // and the reply comes back down with its envelope preserved
        h.higher_in
            .as_ref()
            .unwrap()
            .send((
                FaceId(7),
                Content::new(Name::from_string("/autoconfig/forwarders"), "manifest").into(),
            ))
            .await
            .unwrap();
        let (fid, packet) = recv(&mut h.lower_out).await;
        assert_eq!(fid, FaceId(7));
        assert_eq!(packet.name(), &Name::from_string("/autoconfig/forwarders"));
        assert!(h
            .cs
            .lock()
            .unwrap()
            .find(&Name::from_string("/autoconfig/forwarders"))
            .is_none());
        h.layer.stop().await;
    }

    #[tokio::test]
    async fn local_interest_round_trips_through_higher_queue() {
        let mut h = harness(true, Duration::from_secs(60), Duration::from_secs(60)).await;
        h.fib
            .lock()
            .unwrap()
            .insert(Name::from_string("/x"), FaceId(9), false);

        // the application expresses an Interest
        h.higher_in
            .as_ref()
            .unwrap()
            .send((FACE_LOCAL, interest("/x")))
            .await
            .unwrap();
        let (fid, _) = recv(&mut h.lower_out).await;
        assert_eq!(fid, FaceId(9));
        assert!(h.pit.lock().unwrap().find(&Name::from_string("/x")).unwrap().from_local);

        // content from the network flows to the application
        h.lower_in
            .send((
                FaceId(9),
                Content::new(Name::from_string("/x"), "data").into(),
            ))
            .await
            .unwrap();
        let (fid, packet) = recv(h.higher_out.as_mut().unwrap()).await;
        assert_eq!(fid, FACE_LOCAL);
        assert_eq!(packet.name(), &Name::from_string("/x"));
        h.layer.stop().await;
    }
}
