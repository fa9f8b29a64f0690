//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use ipnetwork::Ipv4Network;
use tokio::sync::Mutex;
use tracing::info;

use crate::debug::Debug;
use crate::error::Error;
use crate::instance::Counters;
use crate::southbound::{Nexthop, RouteSouthbound};

// A managed kernel route: one destination prefix whose next-hop set tracks
// the currently live routers.
#[derive(Debug)]
pub struct Route {
    // Destination prefix.
    pub dst: Ipv4Network,
    // Kernel routing table capability.
    southbound: Arc<dyn RouteSouthbound>,
    // Live route/router counters.
    counters: Arc<Counters>,
    // Run the logical state machine but never issue the kernel mutation.
    dry_run: bool,
    // Next-hop set and kernel state, serialized by the route's own lock.
    state: Mutex<RouteState>,
}

#[derive(Debug, Default)]
struct RouteState {
    // Next-hop records keyed by gateway address.
    nhops: BTreeMap<Ipv4Addr, Nexthop>,
    // True iff the kernel holds a route installed by this daemon.
    up: bool,
}

// ===== impl Route =====

impl Route {
    pub(crate) fn new(
        dst: Ipv4Network,
        southbound: Arc<dyn RouteSouthbound>,
        counters: Arc<Counters>,
        dry_run: bool,
    ) -> Route {
        Route {
            dst,
            southbound,
            counters,
            dry_run,
            state: Default::default(),
        }
    }

    // Inserts a next-hop and reconciles the kernel route. Re-adding an
    // already present gateway only triggers a reconciliation.
    pub async fn add(&self, gw: Ipv4Addr) {
        let mut state = self.state.lock().await;
        state.nhops.insert(gw, Nexthop::new(gw));
        self.reconcile(&mut state).await;
    }

    // Removes a next-hop and reconciles the kernel route.
    pub async fn del(&self, gw: Ipv4Addr) {
        let mut state = self.state.lock().await;
        state.nhops.remove(&gw);
        self.reconcile(&mut state).await;
    }

    // Checks whether any route for this destination is already present in
    // the kernel, regardless of owner. Listing failures count as present so
    // a conflicting route is never fought over.
    pub async fn exists_in_kernel(&self) -> bool {
        match self.southbound.ip_route_exists(&self.dst).await {
            Ok(exists) => exists,
            Err(error) => {
                Error::RouteListError(self.dst, error).log();
                true
            }
        }
    }

    // Marks the route as installed without touching the kernel, so the next
    // reconciliation issues a replace instead of an install. Used when
    // taking over a route that pre-exists at startup.
    pub async fn force_up(&self) {
        self.state.lock().await.up = true;
    }

    // Best-effort removal of the kernel route, used at process exit.
    pub async fn cleanup(&self) {
        if let Err(error) = self.southbound.ip_route_uninstall(&self.dst).await
        {
            Error::RouteDeleteError(self.dst, error).log();
        }
    }

    pub async fn is_up(&self) -> bool {
        self.state.lock().await.up
    }

    pub async fn nexthops(&self) -> Vec<Ipv4Addr> {
        self.state.lock().await.nhops.keys().copied().collect()
    }

    // Reconciles the kernel route with the current next-hop set. On kernel
    // errors the in-memory state is left untouched; the next membership
    // change retries. On a dry run the kernel mutation is skipped and the
    // logical state updates as if it had succeeded.
    async fn reconcile(&self, state: &mut RouteState) {
        let nexthops = state.nhops.values().copied().collect::<Vec<_>>();

        if state.up {
            if nexthops.is_empty() {
                if self.dry_run {
                    Debug::DryRunSkip(&self.dst).log();
                } else if let Err(error) =
                    self.southbound.ip_route_uninstall(&self.dst).await
                {
                    Error::RouteDeleteError(self.dst, error).log();
                    return;
                }
                state.up = false;
                self.counters.route_down();
                info!(prefix = %self.dst, "route is down");
            } else {
                if self.dry_run {
                    Debug::DryRunSkip(&self.dst).log();
                } else if let Err(error) = self
                    .southbound
                    .ip_route_replace(&self.dst, &nexthops)
                    .await
                {
                    Error::RouteReplaceError(self.dst, error).log();
                    return;
                }
                self.counters.notify_if_full();
                info!(prefix = %self.dst, "route updated");
            }
        } else if !nexthops.is_empty() {
            if self.dry_run {
                Debug::DryRunSkip(&self.dst).log();
            } else if let Err(error) = self
                .southbound
                .ip_route_install(&self.dst, &nexthops)
                .await
            {
                Error::RouteInstallError(self.dst, error).log();
                return;
            }
            state.up = true;
            self.counters.route_up();
            info!(prefix = %self.dst, "route is up");
        }
    }
}
