//! Autoconfig client stage, running on a repository.
//!
//! On start it broadcasts a solicitation for `/autoconfig/forwarders`,
//! parses the advertisement manifest, registers the repository under the
//! offered prefixes (local ones preferred) and keeps the registration
//! leased by renewing before the deadline. Non-autoconfig traffic passes
//! through the stage untouched.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use rust_icnd_common::{
    name::Name,
    packet::{Interest, Packet},
    types::FaceId,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::autoconfig::{forwarders_name, parse_remote, service_registration_prefix};
use crate::link::LinkHandle;
use crate::repo::PrefixHandle;
use crate::stage::{recv_optional, PacketRx, PacketTx, Stage, StopSignal};

/// Fraction of the lease after which a renewal is sent.
const RENEWAL_NUMERATOR: u32 = 3;
const RENEWAL_DENOMINATOR: u32 = 4;

pub struct AutoconfigClientLayer {
    repo_name: String,
    prefix: PrefixHandle,
    link: LinkHandle,
    announce_addr: String,
    broadcast_addr: SocketAddr,
    pub register_local: bool,
    pub register_global: bool,
    pub interest_to_app: bool,

    pub queue_from_lower: Option<PacketRx>,
    pub queue_to_lower: Option<PacketTx>,
    pub queue_from_higher: Option<PacketRx>,
    pub queue_to_higher: Option<PacketTx>,

    stop: StopSignal,
}

impl AutoconfigClientLayer {
    pub fn new(
        repo_name: impl Into<String>,
        prefix: PrefixHandle,
        link: LinkHandle,
        announce_addr: impl Into<String>,
        broadcast_addr: SocketAddr,
    ) -> Self {
        Self {
            repo_name: repo_name.into(),
            prefix,
            link,
            announce_addr: announce_addr.into(),
            broadcast_addr,
            register_local: true,
            register_global: true,
            interest_to_app: true,
            queue_from_lower: None,
            queue_to_lower: None,
            queue_from_higher: None,
            queue_to_higher: None,
            stop: StopSignal::new(),
        }
    }
}

#[async_trait]
impl Stage for AutoconfigClientLayer {
    fn name(&self) -> &'static str {
        "autoconfig-client"
    }

    async fn start(&mut self) -> Result<()> {
        if self.stop.is_running() {
            return Ok(());
        }
        let mut from_lower = self
            .queue_from_lower
            .take()
            .context("autoconfig client started without a lower input queue")?;
        let to_lower = self
            .queue_to_lower
            .take()
            .context("autoconfig client started without a lower output queue")?;
        let mut from_higher = self.queue_from_higher.take();
        let to_higher = self.queue_to_higher.take();

        // one-time setsockopt, before the worker begins consuming
        self.link.enable_broadcast()?;
        let broadcast_face = self
            .link
            .face_table()
            .lock()
            .unwrap()
            .get_or_create(self.broadcast_addr, false);

        let mut worker = Worker {
            repo_name: self.repo_name.clone(),
            prefix: self.prefix.clone(),
            link: self.link.clone(),
            announce_addr: self.announce_addr.clone(),
            register_local: self.register_local,
            register_global: self.register_global,
            interest_to_app: self.interest_to_app,
            registrations: Vec::new(),
            to_lower,
            to_higher,
        };
        let mut stop = self.stop.subscribe();

        self.stop.register(tokio::spawn(async move {
            info!("soliciting forwarders over {broadcast_face}");
            worker
                .send_lower(broadcast_face, Interest::new(forwarders_name()).into())
                .await;

            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    envelope = from_lower.recv() => {
                        let Some((fid, packet)) = envelope else { break };
                        worker.data_from_lower(fid, packet).await;
                    }
                    envelope = recv_optional(&mut from_higher) => {
                        match envelope {
                            // everything from the application goes down unchanged
                            Some((fid, packet)) => worker.send_lower(fid, packet).await,
                            None => from_higher = None,
                        }
                    }
                    _ = sleep_until_next(worker.next_renewal()) => {
                        worker.send_due_renewals(Instant::now()).await;
                    }
                }
            }
            debug!("autoconfig client worker exited");
        }));
        Ok(())
    }

    async fn stop(&mut self) {
        self.stop.stop().await;
    }
}

/// Sleep until `deadline`; no deadline means this branch never fires.
async fn sleep_until_next(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
        }
        None => std::future::pending().await,
    }
}

struct Registration {
    /// Full `/autoconfig/service/...` name of the registration Interest.
    name: Name,
    /// Prefix the repository will serve once acknowledged.
    served_prefix: Name,
    /// Face of the forwarder that offered the prefix.
    fid: FaceId,
    /// When to renew; `None` while an answer is outstanding.
    renewal_at: Option<Instant>,
}

struct Worker {
    repo_name: String,
    prefix: PrefixHandle,
    link: LinkHandle,
    announce_addr: String,
    register_local: bool,
    register_global: bool,
    interest_to_app: bool,
    registrations: Vec<Registration>,
    to_lower: PacketTx,
    to_higher: Option<PacketTx>,
}

impl Worker {
    async fn data_from_lower(&mut self, fid: FaceId, packet: Packet) {
        // non-autoconfig traffic passes through the stage untouched
        if !super::is_autoconfig_name(packet.name()) {
            if self.interest_to_app {
                if let Some(to_higher) = &self.to_higher {
                    if to_higher.send((fid, packet)).await.is_err() {
                        warn!("autoconfig client: higher queue closed");
                    }
                    return;
                }
            }
            self.send_lower(fid, packet).await;
            return;
        }

        match packet {
            Packet::Content(content) if content.name == forwarders_name() => {
                self.handle_advertisement(&content.payload).await;
            }
            Packet::Content(content)
                if service_registration_prefix().is_prefix_of(&content.name) =>
            {
                self.handle_registration_ack(&content.name, &content.payload);
            }
            Packet::Nack(nack) if service_registration_prefix().is_prefix_of(&nack.name) => {
                warn!(
                    "registration {} refused with {}, abandoning",
                    nack.name, nack.reason
                );
                self.registrations.retain(|r| r.name != nack.name);
            }
            other => {
                debug!(
                    "autoconfig client: ignoring {} for {}",
                    other.packet_type(),
                    other.name()
                );
            }
        }
    }

    /// Parse a forwarder advertisement and register under the offered
    /// prefixes. Local prefixes are preferred; global ones are used when
    /// local registration is off or nothing local was offered.
    async fn handle_advertisement(&mut self, payload: &[u8]) {
        let Ok(manifest) = std::str::from_utf8(payload) else {
            warn!("forwarder advertisement is not UTF-8, dropped");
            return;
        };
        let mut lines = manifest.lines();
        let Some(forwarder) = lines.next().and_then(|l| parse_remote(l.as_bytes())) else {
            warn!("forwarder advertisement without a transport line, dropped");
            return;
        };
        let fid = self
            .link
            .face_table()
            .lock()
            .unwrap()
            .get_or_create(forwarder, false);
        info!("forwarder {forwarder} advertised itself on {fid}");

        let mut local: Vec<Name> = Vec::new();
        let mut global: Vec<Name> = Vec::new();
        for line in lines {
            match line.split_once(':') {
                Some(("r", name)) => {
                    debug!("forwarder routes {name}");
                }
                Some(("pl", name)) => local.push(Name::from_string(name)),
                Some(("pg", name)) => global.push(Name::from_string(name)),
                _ => debug!("ignoring advertisement line {line:?}"),
            }
        }

        let mut chosen = Vec::new();
        if self.register_local {
            chosen.append(&mut local);
        }
        if self.register_global && (!self.register_local || chosen.is_empty()) {
            chosen.append(&mut global);
        }

        for prefix in chosen {
            let mut served = prefix.clone();
            served.push(self.repo_name.as_str());

            let mut name = service_registration_prefix();
            name.push(
                format!("udp4://{}:{}", self.announce_addr, self.link.local_port()).as_str(),
            );
            name.extend(&prefix);
            name.push(self.repo_name.as_str());

            if self.registrations.iter().any(|r| r.name == name) {
                continue;
            }
            info!("registering {served} at {fid}");
            self.registrations.push(Registration {
                name: name.clone(),
                served_prefix: served,
                fid,
                renewal_at: None,
            });
            self.send_lower(fid, Interest::new(name).into()).await;
        }
    }

    /// A granted lease: adopt the prefix and schedule the renewal before
    /// the deadline.
    fn handle_registration_ack(&mut self, name: &Name, payload: &[u8]) {
        let Some(registration) = self.registrations.iter_mut().find(|r| &r.name == name) else {
            debug!("ack for unknown registration {name}, dropped");
            return;
        };
        let lease_secs = std::str::from_utf8(payload)
            .ok()
            .and_then(|s| s.trim_end().parse::<u64>().ok());
        let Some(lease_secs) = lease_secs else {
            warn!("registration ack for {name} without a lease, dropped");
            return;
        };
        let lease = Duration::from_secs(lease_secs);
        let renewal = lease * RENEWAL_NUMERATOR / RENEWAL_DENOMINATOR;
        info!(
            "registration of {} leased for {lease_secs}s, renewing in {renewal:?}",
            registration.served_prefix
        );
        registration.renewal_at = Some(Instant::now() + renewal);
        self.prefix.set(registration.served_prefix.clone());
    }

    fn next_renewal(&self) -> Option<Instant> {
        self.registrations
            .iter()
            .filter_map(|r| r.renewal_at)
            .min()
    }

    async fn send_due_renewals(&mut self, now: Instant) {
        let mut due = Vec::new();
        for registration in &mut self.registrations {
            if registration.renewal_at.map_or(false, |at| at <= now) {
                registration.renewal_at = None;
                due.push((registration.fid, registration.name.clone()));
            }
        }
        for (fid, name) in due {
            info!("renewing registration {name}");
            self.send_lower(fid, Interest::new(name).into()).await;
        }
    }

    async fn send_lower(&mut self, fid: FaceId, packet: Packet) {
        if self.to_lower.send((fid, packet)).await.is_err() {
            warn!("autoconfig client: lower queue closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::AddressInfo;
    use crate::link::UdpLinkLayer;
    use crate::stage::{packet_queue, PacketEnvelope};
    use std::sync::Arc;
    use rust_icnd_common::metrics::ForwarderMetrics;
    use rust_icnd_common::packet::{Content, Nack, NackReason};
    use tokio::time::timeout;

    struct Harness {
        layer: AutoconfigClientLayer,
        link: LinkHandle,
        prefix: PrefixHandle,
        lower_in: PacketTx,
        lower_out: PacketRx,
        higher_in: PacketTx,
        higher_out: PacketRx,
    }

    /// Mirror of the repository-side test setup: a real link layer (not
    /// started), face 42 preinstalled for the forwarder, and the stage
    /// queues injected directly.
    async fn harness(configure: impl FnOnce(&mut AutoconfigClientLayer)) -> Harness {
        let link = UdpLinkLayer::bind("127.0.0.1:0", Arc::new(ForwarderMetrics::new()))
            .await
            .unwrap()
            .handle();
        link.face_table().lock().unwrap().add(
            FaceId(42),
            AddressInfo::new("127.42.42.42:9000".parse().unwrap()),
        );

        let prefix = PrefixHandle::new(Name::from_string("/unconfigured"));
        let mut layer = AutoconfigClientLayer::new(
            "testrepo",
            prefix.clone(),
            link.clone(),
            "127.0.1.1",
            "127.255.255.255:4242".parse().unwrap(),
        );
        configure(&mut layer);

        let (lower_in_tx, lower_in_rx) = packet_queue();
        let (lower_out_tx, lower_out_rx) = packet_queue();
        let (higher_in_tx, higher_in_rx) = packet_queue();
        let (higher_out_tx, higher_out_rx) = packet_queue();
        layer.queue_from_lower = Some(lower_in_rx);
        layer.queue_to_lower = Some(lower_out_tx);
        layer.queue_from_higher = Some(higher_in_rx);
        layer.queue_to_higher = Some(higher_out_tx);
        layer.start().await.unwrap();

        Harness {
            layer,
            link,
            prefix,
            lower_in: lower_in_tx,
            lower_out: lower_out_rx,
            higher_in: higher_in_tx,
            higher_out: higher_out_rx,
        }
    }

    async fn recv(rx: &mut PacketRx) -> PacketEnvelope {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a packet")
            .expect("queue closed")
    }

    fn registration_name(h: &Harness, prefix: &str) -> Name {
        let mut name = Name::from_string("/autoconfig/service");
        name.push(format!("udp4://127.0.1.1:{}", h.link.local_port()).as_str());
        name.extend(&Name::from_string(prefix));
        name.push("testrepo");
        name
    }

    fn advertisement(body: &str) -> Packet {
        Content::new(forwarders_name(), body.to_string()).into()
    }

    #[tokio::test]
    async fn broadcast_is_enabled_exactly_once() {
        let mut h = harness(|_| {}).await;
        assert_eq!(h.link.broadcast_enable_count(), 1);
        h.layer.stop().await;
    }

    #[tokio::test]
    async fn solicitation_is_the_first_packet_out() {
        let mut h = harness(|_| {}).await;
        let (fid, packet) = recv(&mut h.lower_out).await;
        // the broadcast face was freshly allocated for 127.255.255.255
        assert_eq!(
            h.link.face_table().lock().unwrap().address(fid),
            Some("127.255.255.255:4242".parse().unwrap())
        );
        assert_eq!(
            packet,
            Packet::Interest(Interest::new(Name::from_string("/autoconfig/forwarders")))
        );
        h.layer.stop().await;
    }

    #[tokio::test]
    async fn pass_through_preserves_envelopes_both_ways() {
        let mut h = harness(|_| {}).await;
        let _solicitation = recv(&mut h.lower_out).await;

        let interest: Packet = Interest::new(Name::from_string("/foo/bar")).into();
        h.lower_in.send((FaceId(42), interest.clone())).await.unwrap();
        let (fid, packet) = recv(&mut h.higher_out).await;
        assert_eq!(fid, FaceId(42));
        assert_eq!(packet, interest);

        let content: Packet = Content::new(Name::from_string("/foo/bar"), "foo bar").into();
        h.higher_in
            .send((FaceId(1337), content.clone()))
            .await
            .unwrap();
        let (fid, packet) = recv(&mut h.lower_out).await;
        assert_eq!(fid, FaceId(1337));
        assert_eq!(packet, content);
        h.layer.stop().await;
    }

    #[tokio::test]
    async fn advertisement_triggers_service_registration() {
        let mut h = harness(|_| {}).await;
        let _solicitation = recv(&mut h.lower_out).await;

        h.lower_in
            .send((
                FaceId(42),
                advertisement("udp4://127.42.42.42:9000\nr:/global\npl:/test\n"),
            ))
            .await
            .unwrap();

        let (fid, packet) = recv(&mut h.lower_out).await;
        assert_eq!(fid, FaceId(42));
        assert_eq!(
            packet,
            Packet::Interest(Interest::new(registration_name(&h, "/test")))
        );
        h.layer.stop().await;
    }

    #[tokio::test]
    async fn registration_ack_adopts_the_prefix() {
        let mut h = harness(|_| {}).await;
        let _solicitation = recv(&mut h.lower_out).await;
        h.lower_in
            .send((
                FaceId(42),
                advertisement("udp4://127.42.42.42:9000\nr:/global\npl:/test\n"),
            ))
            .await
            .unwrap();
        let _registration = recv(&mut h.lower_out).await;

        h.lower_in
            .send((
                FaceId(42),
                Content::new(registration_name(&h, "/test"), "3600\n").into(),
            ))
            .await
            .unwrap();

        // the prefix flips once the ack is processed
        let deadline = Instant::now() + Duration::from_secs(5);
        while h.prefix.get() != Name::from_string("/test/testrepo") {
            assert!(Instant::now() < deadline, "prefix never changed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        h.layer.stop().await;
    }

    #[tokio::test]
    async fn registration_nack_leaves_the_prefix_alone() {
        let mut h = harness(|_| {}).await;
        let _solicitation = recv(&mut h.lower_out).await;
        h.lower_in
            .send((
                FaceId(42),
                advertisement("udp4://127.42.42.42:9000\nr:/global\npl:/test\n"),
            ))
            .await
            .unwrap();
        let _registration = recv(&mut h.lower_out).await;

        h.lower_in
            .send((
                FaceId(42),
                Nack::new(registration_name(&h, "/test"), NackReason::NoRoute)
                    .with_interest(Interest::new(registration_name(&h, "/test")))
                    .into(),
            ))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.prefix.get(), Name::from_string("/unconfigured"));
        h.layer.stop().await;
    }

    #[tokio::test]
    async fn renewal_is_sent_before_the_lease_expires() {
        let mut h = harness(|_| {}).await;
        let _solicitation = recv(&mut h.lower_out).await;
        h.lower_in
            .send((
                FaceId(42),
                advertisement("udp4://127.42.42.42:9000\nr:/global\npl:/test\n"),
            ))
            .await
            .unwrap();
        let _registration = recv(&mut h.lower_out).await;

        // a one-second lease schedules the renewal at 750 ms
        let granted = Instant::now();
        h.lower_in
            .send((
                FaceId(42),
                Content::new(registration_name(&h, "/test"), "1\n").into(),
            ))
            .await
            .unwrap();

        let (fid, packet) = recv(&mut h.lower_out).await;
        assert!(granted.elapsed() < Duration::from_secs(1));
        assert_eq!(fid, FaceId(42));
        assert_eq!(
            packet,
            Packet::Interest(Interest::new(registration_name(&h, "/test")))
        );
        h.layer.stop().await;
    }

    #[tokio::test]
    async fn global_prefixes_are_skipped_when_local_ones_exist() {
        let mut h = harness(|_| {}).await;
        let _solicitation = recv(&mut h.lower_out).await;
        h.lower_in
            .send((
                FaceId(42),
                advertisement("udp4://127.42.42.42:9000\nr:/global\npl:/test\npg:/routed\n"),
            ))
            .await
            .unwrap();

        let (_, packet) = recv(&mut h.lower_out).await;
        assert_eq!(
            packet,
            Packet::Interest(Interest::new(registration_name(&h, "/test")))
        );
        // and nothing else follows
        assert!(
            timeout(Duration::from_millis(300), h.lower_out.recv())
                .await
                .is_err()
        );
        h.layer.stop().await;
    }

    #[tokio::test]
    async fn global_only_registration_uses_the_global_prefix() {
        let mut h = harness(|layer| {
            layer.register_local = false;
            layer.register_global = true;
        })
        .await;
        let _solicitation = recv(&mut h.lower_out).await;
        h.lower_in
            .send((
                FaceId(42),
                advertisement("udp4://127.42.42.42:9000\nr:/global\npl:/test\npg:/routed\n"),
            ))
            .await
            .unwrap();

        let (_, packet) = recv(&mut h.lower_out).await;
        assert_eq!(
            packet,
            Packet::Interest(Interest::new(registration_name(&h, "/routed")))
        );
        assert!(
            timeout(Duration::from_millis(300), h.lower_out.recv())
                .await
                .is_err()
        );
        h.layer.stop().await;
    }
}
