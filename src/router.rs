//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::debug::Debug;
use crate::instance::Counters;
use crate::route::Route;
use crate::tasks;
use crate::tasks::messages::ProtocolMsg;
use crate::tasks::TimeoutTask;

// Managed routes keyed by canonical prefix string. Populated once at
// startup, read-only thereafter.
pub type Routes = BTreeMap<String, Arc<Route>>;

// An upstream router whose liveness is inferred from passively observed
// Hellos. Routers always start in the down state.
#[derive(Debug)]
pub struct Router {
    // Router address, which is also the gateway address installed in every
    // managed route while the router is up.
    pub ip: Ipv4Addr,
    // Silence interval after which the router is declared dead.
    dead_interval: Duration,
    // Managed routes (shared, read-only).
    routes: Arc<Routes>,
    // Live route/router counters.
    counters: Arc<Counters>,
    // Engine input channel, used to arm dead timers.
    proto_input_tx: UnboundedSender<ProtocolMsg>,
    // Liveness state, serialized by the router's own lock.
    state: Mutex<RouterState>,
}

#[derive(Debug, Default)]
struct RouterState {
    up: bool,
    // Armed iff the router is up.
    dead_timer: Option<TimeoutTask>,
}

// ===== impl Router =====

impl Router {
    pub(crate) fn new(
        ip: Ipv4Addr,
        dead_interval: Duration,
        routes: Arc<Routes>,
        counters: Arc<Counters>,
        proto_input_tx: UnboundedSender<ProtocolMsg>,
    ) -> Router {
        Router {
            ip,
            dead_interval,
            routes,
            counters,
            proto_input_tx,
            state: Default::default(),
        }
    }

    // Reports a received Hello: rearms the dead timer when the router is
    // already up, otherwise brings the router up.
    pub async fn hello(self: &Arc<Self>) {
        Debug::HelloRx(&self.ip).log();
        let mut state = self.state.lock().await;
        if state.up {
            state.dead_timer = Some(tasks::router_dead_timer(
                self.ip,
                self.dead_interval,
                &self.proto_input_tx,
            ));
        } else {
            drop(state);
            info!(router = %self.ip, "router returned to service");
            self.up().await;
        }
    }

    // Transitions the router to up, arms the dead timer and joins the
    // next-hop set of every managed route.
    //
    // The router lock is released before any route is touched; the lock
    // order is always Router, then Route.
    pub async fn up(self: &Arc<Self>) {
        let mut state = self.state.lock().await;
        if state.up {
            Debug::RouterAlreadyUp(&self.ip).log();
            return;
        }
        state.up = true;
        state.dead_timer = Some(tasks::router_dead_timer(
            self.ip,
            self.dead_interval,
            &self.proto_input_tx,
        ));
        drop(state);

        info!(router = %self.ip, "router is now up");
        for route in self.routes.values() {
            route.add(self.ip).await;
        }
        self.counters.router_up();
    }

    // Transitions the router to down, disarms the dead timer and leaves the
    // next-hop set of every managed route.
    pub async fn down(&self) {
        let mut state = self.state.lock().await;
        if !state.up {
            Debug::RouterAlreadyDown(&self.ip).log();
            return;
        }
        state.up = false;
        state.dead_timer = None;
        drop(state);

        info!(router = %self.ip, "router is now down");
        for route in self.routes.values() {
            route.del(self.ip).await;
        }
        self.counters.router_down();
    }

    // Dead-timer expiry: no Hello was seen for a full dead interval.
    pub async fn dead(&self) {
        warn!(router = %self.ip, "router hit dead state");
        self.down().await;
    }

    pub async fn is_up(&self) -> bool {
        self.state.lock().await.up
    }
}
