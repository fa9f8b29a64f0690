//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use socket2::Socket;
use tokio::io::unix::AsyncFd;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::events;
use crate::notify::ReadinessNotifier;
use crate::route::Route;
use crate::router::{Router, Routes};
use crate::southbound::RouteSouthbound;
use crate::tasks;
use crate::tasks::messages::ProtocolMsg;

// Atomic counts of live routes and routers. The route counter drives the
// readiness trigger when it first reaches the managed total; the router
// counter is informational.
#[derive(Debug)]
pub struct Counters {
    routes_up: AtomicI32,
    routers_up: AtomicI32,
    // Managed totals, written once at startup.
    routes_total: AtomicUsize,
    routers_total: AtomicUsize,
    notifier: Arc<dyn ReadinessNotifier>,
}

// The engine: owns the registries and the event channel, and drives the
// daemon lifecycle.
#[derive(Debug)]
pub struct Instance {
    pub config: Config,
    pub routes: Arc<Routes>,
    pub routers: BTreeMap<Ipv4Addr, Arc<Router>>,
    pub counters: Arc<Counters>,
    proto_input_tx: UnboundedSender<ProtocolMsg>,
}

// ===== impl Counters =====

impl Counters {
    pub(crate) fn new(notifier: Arc<dyn ReadinessNotifier>) -> Counters {
        Counters {
            routes_up: AtomicI32::new(0),
            routers_up: AtomicI32::new(0),
            routes_total: AtomicUsize::new(0),
            routers_total: AtomicUsize::new(0),
            notifier,
        }
    }

    // Records the managed totals. Called once, before any state machine can
    // run.
    fn set_totals(&self, routes: usize, routers: usize) {
        self.routes_total.store(routes, Ordering::Relaxed);
        self.routers_total.store(routers, Ordering::Relaxed);
    }

    pub(crate) fn route_up(&self) {
        let count = self.routes_up.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.routes_total.load(Ordering::Relaxed);
        info!("there are {}/{} routes up", count, total);
        if count as usize == total {
            self.notifier.notify_ready();
        }
    }

    pub(crate) fn route_down(&self) {
        let count = self.routes_up.fetch_sub(1, Ordering::Relaxed) - 1;
        let total = self.routes_total.load(Ordering::Relaxed);
        info!("there are {}/{} routes up", count, total);
    }

    // Offers the notifier another opportunity after a successful replace.
    pub(crate) fn notify_if_full(&self) {
        let count = self.routes_up.load(Ordering::Relaxed);
        if count as usize == self.routes_total.load(Ordering::Relaxed) {
            self.notifier.notify_ready();
        }
    }

    pub(crate) fn router_up(&self) {
        let count = self.routers_up.fetch_add(1, Ordering::Relaxed) + 1;
        let total = self.routers_total.load(Ordering::Relaxed);
        info!("there are {}/{} routers up", count, total);
    }

    pub(crate) fn router_down(&self) {
        let count = self.routers_up.fetch_sub(1, Ordering::Relaxed) - 1;
        let total = self.routers_total.load(Ordering::Relaxed);
        info!("there are {}/{} routers up", count, total);
    }

    pub fn routes_up(&self) -> i32 {
        self.routes_up.load(Ordering::Relaxed)
    }

    pub fn routers_up(&self) -> i32 {
        self.routers_up.load(Ordering::Relaxed)
    }
}

// ===== impl Instance =====

impl Instance {
    // Builds the registries: one managed route per configured prefix that
    // survives the takeover check, one router per configured address, and
    // optionally marks every router up at startup.
    //
    // Returns the instance together with the receiving half of its input
    // channel, to be passed back into [`Instance::run`].
    pub async fn init(
        config: Config,
        southbound: Arc<dyn RouteSouthbound>,
        notifier: Arc<dyn ReadinessNotifier>,
    ) -> (Instance, UnboundedReceiver<ProtocolMsg>) {
        let (proto_input_tx, proto_input_rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::new(notifier));

        // Managed routes. Prefixes that already exist in the kernel are
        // dropped from management unless a takeover was requested; taken
        // over routes are marked up so their first mutation is a replace.
        let mut routes = Routes::new();
        for prefix in &config.routes {
            let route = Route::new(
                prefix.0,
                southbound.clone(),
                counters.clone(),
                config.dry_run,
            );
            if route.exists_in_kernel().await {
                if config.force {
                    route.force_up().await;
                    warn!(prefix = %prefix, "route exists, taking over");
                } else {
                    Error::RouteExists(prefix.0).log();
                    continue;
                }
            }
            info!(prefix = %prefix, "managing route");
            routes.insert(prefix.to_string(), Arc::new(route));
        }
        let routes = Arc::new(routes);
        counters.set_totals(routes.len(), config.routers.len());

        // Routers, all starting down.
        let mut routers = BTreeMap::new();
        for addr in &config.routers {
            let router = Arc::new(Router::new(
                *addr,
                config.dead,
                routes.clone(),
                counters.clone(),
                proto_input_tx.clone(),
            ));
            info!(router = %addr, "added router");
            routers.insert(*addr, router);
        }

        let instance = Instance {
            config,
            routes,
            routers,
            counters,
            proto_input_tx,
        };

        // Optionally assume every router is alive until proven dead.
        if instance.config.up {
            for router in instance.routers.values() {
                router.up().await;
            }
        }

        (instance, proto_input_rx)
    }

    // Runs the engine: spawns the network receive task and demultiplexes
    // input events until an interrupt or termination signal arrives.
    pub async fn run(
        self,
        mut proto_input_rx: UnboundedReceiver<ProtocolMsg>,
        socket: Socket,
    ) -> std::io::Result<()> {
        let socket = Arc::new(AsyncFd::new(socket)?);
        let _net_rx_task = tasks::net_rx(socket, &self.proto_input_tx);

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        loop {
            tokio::select! {
                msg = proto_input_rx.recv() => match msg {
                    Some(msg) => events::process(&self, msg),
                    None => break,
                },
                _ = sigterm.recv() => break,
                _ = sigint.recv() => break,
            }
        }

        self.shutdown().await;
        Ok(())
    }

    // Removes every managed route, unless configured otherwise.
    pub async fn shutdown(&self) {
        if self.config.noclean {
            info!("exiting, leaving managed routes in place");
            return;
        }
        info!("exiting, cleaning up managed routes");
        for route in self.routes.values() {
            route.cleanup().await;
        }
    }
}
