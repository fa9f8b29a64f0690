//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use async_trait::async_trait;
use derive_new::new;
use ipnetwork::Ipv4Network;

// Route next-hop, keyed by its gateway address.
#[derive(Clone, Copy, Debug, Eq, PartialEq, new)]
pub struct Nexthop {
    pub gw: Ipv4Addr,
}

// Kernel routing table capability.
//
// All operations act on IPv4 routes keyed by their exact destination
// prefix. Errors are surfaced verbatim to the caller; no retries are
// performed at this layer.
#[async_trait]
pub trait RouteSouthbound: Send + Sync + std::fmt::Debug {
    // Installs a route with the given non-empty next-hop set (multipath
    // when more than one next-hop is present).
    async fn ip_route_install(
        &self,
        prefix: &Ipv4Network,
        nexthops: &[Nexthop],
    ) -> std::io::Result<()>;

    // Atomically replaces the route for the given destination.
    async fn ip_route_replace(
        &self,
        prefix: &Ipv4Network,
        nexthops: &[Nexthop],
    ) -> std::io::Result<()>;

    // Removes the route for the given destination.
    async fn ip_route_uninstall(
        &self,
        prefix: &Ipv4Network,
    ) -> std::io::Result<()>;

    // Checks whether any route with exactly the given destination is
    // present, regardless of owner.
    async fn ip_route_exists(
        &self,
        prefix: &Ipv4Network,
    ) -> std::io::Result<bool>;
}
