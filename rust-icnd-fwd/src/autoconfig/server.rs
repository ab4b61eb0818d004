//! Autoconfig server stage, running on a forwarder.
//!
//! Intercepts Interests under the reserved `/autoconfig` prefixes coming
//! up from the ICN layer and answers them directly; everything else
//! passes through the stage untouched. Registration installs a static
//! face and a static FIB entry for the service and grants a renewable
//! lease.

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use rust_icnd_common::{
    name::Name,
    packet::{Content, Interest, Nack, NackReason, Packet},
    types::FaceId,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::autoconfig::{
    autoconfig_name, forwarders_name, parse_remote, service_list_prefix,
    service_registration_prefix,
};
use crate::face::SharedFaceTable;
use crate::stage::{PacketRx, PacketTx, Stage, StopSignal};
use crate::tables::SharedFib;
use crate::SERVICE_REGISTRATION_LEASE_SECS;

/// A prefix under which repositories may register services.
#[derive(Debug, Clone)]
pub struct RegistrationPrefix {
    pub name: Name,
    /// Global prefixes are routed beyond this forwarder; local ones are
    /// visible here only.
    pub global: bool,
}

#[derive(Debug, Clone)]
struct KnownService {
    name: Name,
    addr: SocketAddr,
    lease_deadline: Instant,
}

pub struct AutoconfigServerLayer {
    faces: SharedFaceTable,
    fib: SharedFib,
    announce_addr: String,
    link_port: u16,
    /// Deliver non-autoconfig packets to the stage above instead of
    /// reflecting them back down.
    pub interest_to_app: bool,
    registration_prefixes: Vec<RegistrationPrefix>,
    lease: Duration,

    pub queue_from_lower: Option<PacketRx>,
    pub queue_to_lower: Option<PacketTx>,
    pub queue_from_higher: Option<PacketRx>,
    pub queue_to_higher: Option<PacketTx>,

    stop: StopSignal,
}

impl AutoconfigServerLayer {
    pub fn new(
        faces: SharedFaceTable,
        fib: SharedFib,
        announce_addr: impl Into<String>,
        link_port: u16,
        registration_prefixes: Vec<RegistrationPrefix>,
    ) -> Self {
        Self {
            faces,
            fib,
            announce_addr: announce_addr.into(),
            link_port,
            interest_to_app: false,
            registration_prefixes,
            lease: Duration::from_secs(SERVICE_REGISTRATION_LEASE_SECS),
            queue_from_lower: None,
            queue_to_lower: None,
            queue_from_higher: None,
            queue_to_higher: None,
            stop: StopSignal::new(),
        }
    }

    /// Override the registration lease; tests use short leases.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }
}

#[async_trait]
impl Stage for AutoconfigServerLayer {
    fn name(&self) -> &'static str {
        "autoconfig-server"
    }

    async fn start(&mut self) -> Result<()> {
        if self.stop.is_running() {
            return Ok(());
        }
        let mut from_lower = self
            .queue_from_lower
            .take()
            .context("autoconfig server started without a lower input queue")?;
        let to_lower = self
            .queue_to_lower
            .take()
            .context("autoconfig server started without a lower output queue")?;
        let mut from_higher = self.queue_from_higher.take();
        let to_higher = self.queue_to_higher.take();

        let mut worker = Worker {
            faces: self.faces.clone(),
            fib: self.fib.clone(),
            announce_addr: self.announce_addr.clone(),
            link_port: self.link_port,
            interest_to_app: self.interest_to_app,
            registration_prefixes: self.registration_prefixes.clone(),
            lease: self.lease,
            known_services: Vec::new(),
            to_lower,
            to_higher,
        };
        let mut stop = self.stop.subscribe();

        self.stop.register(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    envelope = from_lower.recv() => {
                        let Some((fid, packet)) = envelope else { break };
                        worker.data_from_lower(fid, packet).await;
                    }
                    envelope = crate::stage::recv_optional(&mut from_higher) => {
                        match envelope {
                            // everything from the application goes down unchanged
                            Some((fid, packet)) => worker.send_lower(fid, packet).await,
                            None => from_higher = None,
                        }
                    }
                }
            }
            debug!("autoconfig server worker exited");
        }));
        Ok(())
    }

    async fn stop(&mut self) {
        self.stop.stop().await;
    }
}

struct Worker {
    faces: SharedFaceTable,
    fib: SharedFib,
    announce_addr: String,
    link_port: u16,
    interest_to_app: bool,
    registration_prefixes: Vec<RegistrationPrefix>,
    lease: Duration,
    known_services: Vec<KnownService>,
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
                        warn!("autoconfig server: higher queue closed");
                    }
                    return;
                }
            }
            self.send_lower(fid, packet).await;
            return;
        }

        let interest = match packet {
            Packet::Interest(interest) => interest,
            other => {
                debug!(
                    "autoconfig server: ignoring {} for {}",
                    other.packet_type(),
                    other.name()
                );
                return;
            }
        };

        let name = interest.name.clone();
        let reply = if name == autoconfig_name() {
            Some(self.handle_autoconfig(&interest))
        } else if name == forwarders_name() {
            Some(self.handle_forwarders(&interest))
        } else if service_list_prefix().is_prefix_of(&name) {
            Some(self.handle_service_list(&interest))
        } else if service_registration_prefix().is_prefix_of(&name) {
            self.handle_service_registration(&interest)
        } else {
            warn!("autoconfig server: unhandled name {name}");
            None
        };
        if let Some(reply) = reply {
            self.send_lower(fid, reply).await;
        }
    }

    /// `/autoconfig`: self-description with announce address, routed
    /// prefixes, registration prefixes.
    fn handle_autoconfig(&self, interest: &Interest) -> Packet {
        info!("autoconfig information requested");
        let mut manifest = format!("{}:{}\n", self.announce_addr, self.link_port);
        for entry in self.sorted_fib_entries() {
            manifest.push_str(&format!("r:{}\n", entry));
        }
        for prefix in &self.registration_prefixes {
            manifest.push_str(&format!("p:{}\n", prefix.name));
        }
        Content::new(interest.name.clone(), manifest).into()
    }

    /// `/autoconfig/forwarders`: the advertisement format repositories
    /// parse: transport URI plus routed and registration prefixes.
    fn handle_forwarders(&self, interest: &Interest) -> Packet {
        info!("forwarder advertisement requested");
        let mut manifest = format!("udp4://{}:{}\n", self.announce_addr, self.link_port);
        for entry in self.sorted_fib_entries() {
            manifest.push_str(&format!("r:{}\n", entry));
        }
        for prefix in &self.registration_prefixes {
            let tag = if prefix.global { "pg" } else { "pl" };
            manifest.push_str(&format!("{}:{}\n", tag, prefix.name));
        }
        Content::new(interest.name.clone(), manifest).into()
    }

    /// `/autoconfig/services/<prefix>`: list known, unexpired services.
    fn handle_service_list(&self, interest: &Interest) -> Packet {
        let srvprefix = interest.name.suffix(service_list_prefix().len());
        let now = Instant::now();
        let mut listing = String::new();
        for service in &self.known_services {
            if service.lease_deadline <= now {
                continue;
            }
            if srvprefix.is_empty() || srvprefix.is_prefix_of(&service.name) {
                listing.push_str(&format!("{}\n", service.name));
            }
        }
        if listing.is_empty() {
            info!("no known services under {srvprefix}, sending Nack");
            Nack::new(interest.name.clone(), NackReason::NoContent)
                .with_interest(interest.clone())
                .into()
        } else {
            info!("sending list of services under {srvprefix}");
            Content::new(interest.name.clone(), listing).into()
        }
    }

    /// `/autoconfig/service/<remote>/<service_name...>`: register a
    /// service: static face, static FIB entry, leased known-service
    /// record. Replies with the lease length in seconds.
    fn handle_service_registration(&mut self, interest: &Interest) -> Option<Packet> {
        info!("service registration requested");
        let name = &interest.name;
        let skip = service_registration_prefix().len();
        let Some(remote) = name.get(skip).and_then(|c| parse_remote(c.as_bytes())) else {
            warn!("service registration with unparseable remote, dropped");
            return None;
        };
        let srvname = name.suffix(skip + 1);
        if srvname.is_empty() {
            warn!("service registration without a service name, dropped");
            return None;
        }

        let permitted = self
            .registration_prefixes
            .iter()
            .any(|p| p.name.is_empty() || p.name.is_prefix_of(&srvname));
        if !permitted {
            info!("service {srvname} outside the registration prefixes");
            return Some(
                Nack::new(name.clone(), NackReason::NoRoute)
                    .with_interest(interest.clone())
                    .into(),
            );
        }

        let now = Instant::now();
        // expired leases no longer block re-registration elsewhere
        self.known_services.retain(|s| s.lease_deadline > now);
        if let Some(existing) = self.known_services.iter_mut().find(|s| s.name == srvname) {
            if existing.addr != remote {
                info!("service {srvname} already registered from {}", existing.addr);
                return Some(
                    Nack::new(name.clone(), NackReason::Duplicate)
                        .with_interest(interest.clone())
                        .into(),
                );
            }
            existing.lease_deadline = now + self.lease;
        } else {
            self.known_services.push(KnownService {
                name: srvname.clone(),
                addr: remote,
                lease_deadline: now + self.lease,
            });
        }

        let srvfid = self.faces.lock().unwrap().get_or_create(remote, true);
        self.fib.lock().unwrap().insert(srvname.clone(), srvfid, true);
        info!("registered {srvname} at {remote} via {srvfid}");
        Some(Content::new(name.clone(), format!("{}\n", self.lease.as_secs())).into())
    }

    fn sorted_fib_entries(&self) -> Vec<Name> {
        let mut names: Vec<Name> = self
            .fib
            .lock()
            .unwrap()
            .entries()
            .iter()
            .map(|e| e.prefix.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    async fn send_lower(&mut self, fid: FaceId, packet: Packet) {
        if self.to_lower.send((fid, packet)).await.is_err() {
            warn!("autoconfig server: lower queue closed");
        }
    }
}
