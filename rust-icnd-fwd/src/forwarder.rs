//! Assemblies: a complete forwarder and a complete repository stack.
//!
//! Each assembly constructs its stages, wires the bounded queues between
//! them, starts bottom-up and stops top-down so that inflight packets
//! drain into closing sinks.

use anyhow::{Context, Result};
use log::info;
use rust_icnd_common::{metrics::ForwarderMetrics, name::Name};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::autoconfig::server::RegistrationPrefix;
use crate::autoconfig::{AutoconfigClientLayer, AutoconfigServerLayer};
use crate::config::{ForwarderOptions, RepoOptions};
use crate::encoding::PacketEncodingLayer;
use crate::icn::IcnLayer;
use crate::link::{LinkHandle, UdpLinkLayer};
use crate::repo::{MemoryRepo, PrefixHandle, RepoApp};
use crate::routing::{RouteUpdate, RoutingLayer};
use crate::stage::{frame_queue, packet_queue, Stage};
use crate::tables::{ContentStore, Fib, Pit, SharedContentStore, SharedFib, SharedPit};

/// A complete ICN forwarder: link, encoding, ICN and (optionally)
/// autoconfig stages plus the routing stage, sharing one set of tables.
pub struct IcnForwarder {
    options: ForwarderOptions,
    metrics: Arc<ForwarderMetrics>,
    cs: SharedContentStore,
    pit: SharedPit,
    fib: SharedFib,

    link: UdpLinkLayer,
    encoding: PacketEncodingLayer,
    icn: IcnLayer,
    routing: RoutingLayer,
    autoconfig: Option<AutoconfigServerLayer>,

    started: bool,
}

impl IcnForwarder {
    pub async fn new(options: ForwarderOptions) -> Result<Self> {
        let metrics = Arc::new(ForwarderMetrics::new());

        let mut link = UdpLinkLayer::bind(&options.listen_addr, Arc::clone(&metrics)).await?;

        let cs: SharedContentStore = Arc::new(Mutex::new(ContentStore::new(
            options.cs_capacity,
            Duration::from_secs(options.cs_ttl_secs),
            Arc::clone(&metrics),
        )));
        let pit: SharedPit = Arc::new(Mutex::new(Pit::new(
            Duration::from_secs(options.pit_ttl_secs),
            Arc::clone(&metrics),
        )));
        let fib: SharedFib = Arc::new(Mutex::new(Fib::new(Arc::clone(&metrics))));

        let mut encoding =
            PacketEncodingLayer::new(options.codec.build(), Arc::clone(&metrics));
        let mut icn = IcnLayer::new(
            Arc::clone(&cs),
            Arc::clone(&pit),
            Arc::clone(&fib),
            Duration::from_secs(options.ageing_interval_secs),
            Arc::clone(&metrics),
        );
        let routing = RoutingLayer::new(
            Arc::clone(&fib),
            options.shortest_routes_only,
            Duration::from_secs(options.rib_compile_interval_secs),
        );

        // link <-> encoding
        let (link_up_tx, link_up_rx) = frame_queue();
        let (link_down_tx, link_down_rx) = frame_queue();
        link.queue_to_higher = Some(link_up_tx);
        link.queue_from_higher = Some(link_down_rx);
        encoding.queue_from_lower = Some(link_up_rx);
        encoding.queue_to_lower = Some(link_down_tx);

        // encoding <-> icn
        let (icn_up_tx, icn_up_rx) = packet_queue();
        let (icn_down_tx, icn_down_rx) = packet_queue();
        encoding.queue_to_higher = Some(icn_up_tx);
        encoding.queue_from_higher = Some(icn_down_rx);
        icn.queue_from_lower = Some(icn_up_rx);
        icn.queue_to_lower = Some(icn_down_tx);

        // icn <-> autoconfig
        let autoconfig = if options.autoconfig {
            let prefixes = options
                .registration_prefixes
                .iter()
                .map(|p| RegistrationPrefix {
                    name: Name::from_string(&p.name),
                    global: p.global,
                })
                .collect();
            let mut layer = AutoconfigServerLayer::new(
                link.face_table(),
                Arc::clone(&fib),
                options.announce_addr.clone(),
                link.local_port(),
                prefixes,
            );
            layer.interest_to_app = options.interest_to_app;
            let (auto_up_tx, auto_up_rx) = packet_queue();
            let (auto_down_tx, auto_down_rx) = packet_queue();
            icn.queue_to_higher = Some(auto_up_tx);
            icn.queue_from_higher = Some(auto_down_rx);
            layer.queue_from_lower = Some(auto_up_rx);
            layer.queue_to_lower = Some(auto_down_tx);
            Some(layer)
        } else {
            None
        };

        let forwarder = Self {
            options,
            metrics,
            cs,
            pit,
            fib,
            link,
            encoding,
            icn,
            routing,
            autoconfig,
            started: false,
        };
        forwarder.seed_static_routes()?;
        Ok(forwarder)
    }

    /// Install the configured routes as static faces and FIB entries.
    fn seed_static_routes(&self) -> Result<()> {
        for route in &self.options.routes {
            let addr = route
                .next_hop
                .parse()
                .with_context(|| format!("invalid next hop address {}", route.next_hop))?;
            let fid = self
                .link
                .face_table()
                .lock()
                .unwrap()
                .get_or_create(addr, true);
            let prefix = Name::from_string(&route.prefix);
            info!("static route {prefix} via {fid} ({addr})");
            self.fib.lock().unwrap().insert(prefix, fid, true);
        }
        Ok(())
    }

    /// Start all stages, bottom-up.
    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        if self.options.autoconfig {
            self.link.enable_broadcast()?;
        }
        self.link.start().await?;
        self.encoding.start().await?;
        self.icn.start().await?;
        self.routing.start().await?;
        if let Some(autoconfig) = &mut self.autoconfig {
            autoconfig.start().await?;
        }
        self.started = true;
        info!("forwarder running on {}", self.link.local_addr());
        Ok(())
    }

    /// Stop all stages, top-down, so inflight packets drain into closing
    /// sinks. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(autoconfig) = &mut self.autoconfig {
            autoconfig.stop().await;
        }
        self.routing.stop().await;
        self.icn.stop().await;
        self.encoding.stop().await;
        self.link.stop().await;
        self.started = false;
        info!("forwarder stopped");
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.link.local_addr()
    }

    pub fn link(&self) -> LinkHandle {
        self.link.handle()
    }

    pub fn content_store(&self) -> SharedContentStore {
        Arc::clone(&self.cs)
    }

    pub fn pit(&self) -> SharedPit {
        Arc::clone(&self.pit)
    }

    pub fn fib(&self) -> SharedFib {
        Arc::clone(&self.fib)
    }

    /// Publish route updates into the routing stage.
    pub fn route_updates(&self) -> mpsc::Sender<RouteUpdate> {
        self.routing.updates()
    }

    pub fn metrics(&self) -> Arc<ForwarderMetrics> {
        Arc::clone(&self.metrics)
    }
}

/// A complete repository stack: link, encoding, autoconfig client and the
/// in-memory repository application on top.
pub struct Repository {
    link: UdpLinkLayer,
    encoding: PacketEncodingLayer,
    client: AutoconfigClientLayer,
    app: RepoApp,
    repo: Arc<MemoryRepo>,
    started: bool,
}

impl Repository {
    pub async fn new(options: RepoOptions) -> Result<Self> {
        let metrics = Arc::new(ForwarderMetrics::new());
        let mut link = UdpLinkLayer::bind(&options.listen_addr, Arc::clone(&metrics)).await?;

        let prefix = PrefixHandle::new(Name::from_string(&options.initial_prefix));
        let repo = Arc::new(MemoryRepo::new(prefix.clone()));

        let broadcast_addr = options
            .broadcast_addr
            .parse()
            .with_context(|| format!("invalid broadcast address {}", options.broadcast_addr))?;
        let mut client = AutoconfigClientLayer::new(
            options.name.clone(),
            prefix,
            link.handle(),
            options.announce_addr.clone(),
            broadcast_addr,
        );
        client.register_local = options.register_local;
        client.register_global = options.register_global;

        let mut encoding =
            PacketEncodingLayer::new(options.codec.build(), Arc::clone(&metrics));
        let mut app = RepoApp::new(Arc::clone(&repo));

        // link <-> encoding
        let (link_up_tx, link_up_rx) = frame_queue();
        let (link_down_tx, link_down_rx) = frame_queue();
        link.queue_to_higher = Some(link_up_tx);
        link.queue_from_higher = Some(link_down_rx);
        encoding.queue_from_lower = Some(link_up_rx);
        encoding.queue_to_lower = Some(link_down_tx);

        // encoding <-> autoconfig client
        let (client_up_tx, client_up_rx) = packet_queue();
        let (client_down_tx, client_down_rx) = packet_queue();
        encoding.queue_to_higher = Some(client_up_tx);
        encoding.queue_from_higher = Some(client_down_rx);
        client.queue_from_lower = Some(client_up_rx);
        client.queue_to_lower = Some(client_down_tx);

        // autoconfig client <-> repo application
        let (app_up_tx, app_up_rx) = packet_queue();
        let (app_down_tx, app_down_rx) = packet_queue();
        client.queue_to_higher = Some(app_up_tx);
        client.queue_from_higher = Some(app_down_rx);
        app.queue_from_lower = Some(app_up_rx);
        app.queue_to_lower = Some(app_down_tx);

        Ok(Self {
            link,
            encoding,
            client,
            app,
            repo,
            started: false,
        })
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.link.start().await?;
        self.encoding.start().await?;
        self.client.start().await?;
        self.app.start().await?;
        self.started = true;
        info!("repository running on {}", self.link.local_addr());
        Ok(())
    }

    pub async fn stop(&mut self) {
        self.app.stop().await;
        self.client.stop().await;
        self.encoding.stop().await;
        self.link.stop().await;
        self.started = false;
        info!("repository stopped");
    }

    pub fn repo(&self) -> Arc<MemoryRepo> {
        Arc::clone(&self.repo)
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.link.local_addr()
    }
}
