//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use async_trait::async_trait;
use bytes::BufMut;
use futures::TryStreamExt;
use ipnetwork::Ipv4Network;
use netlink_packet_route::route::nlas::Nla;
use rtnetlink::{new_connection, Handle, IpVersion, RouteAddRequest};

use crate::southbound::{Nexthop, RouteSouthbound};

// Route protocol type as defined in the rtnetlink.h kernel header. Managed
// routes are tagged like statically administered ones, distinguishing them
// from the kernel's own and from routing protocol daemons'.
const NETLINK_PROTO_BOOT: u8 = 3;

// Routing table as defined in the rtnetlink.h kernel header.
const RT_TABLE_MAIN: u8 = 254;

// RTA_MULTIPATH encoding constants from the rtnetlink.h kernel header:
// per-nexthop rtnexthop header length, gateway attribute type and length.
const RTNH_LEN: u16 = 8;
const RTA_GATEWAY: u16 = 5;
const RTA_GATEWAY_LEN: u16 = 8;

// Kernel routing table capability implemented over the rtnetlink socket.
pub struct NetlinkSouthbound {
    handle: Handle,
}

// ===== impl NetlinkSouthbound =====

impl NetlinkSouthbound {
    pub fn new(handle: Handle) -> NetlinkSouthbound {
        NetlinkSouthbound { handle }
    }

    // Builds a route add/replace request carrying the full next-hop set as
    // an RTA_MULTIPATH attribute.
    fn add_request(
        &self,
        prefix: &Ipv4Network,
        nexthops: &[Nexthop],
        replace: bool,
    ) -> RouteAddRequest<Ipv4Addr> {
        let mut request = self
            .handle
            .route()
            .add()
            .protocol(NETLINK_PROTO_BOOT)
            .v4()
            .destination_prefix(prefix.ip(), prefix.prefix());
        if replace {
            request = request.replace();
        }
        request
            .message_mut()
            .nlas
            .push(Nla::MultiPath(multipath(nexthops)));
        request
    }
}

impl std::fmt::Debug for NetlinkSouthbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetlinkSouthbound").finish_non_exhaustive()
    }
}

#[async_trait]
impl RouteSouthbound for NetlinkSouthbound {
    async fn ip_route_install(
        &self,
        prefix: &Ipv4Network,
        nexthops: &[Nexthop],
    ) -> std::io::Result<()> {
        self.add_request(prefix, nexthops, false)
            .execute()
            .await
            .map_err(io_error)
    }

    async fn ip_route_replace(
        &self,
        prefix: &Ipv4Network,
        nexthops: &[Nexthop],
    ) -> std::io::Result<()> {
        self.add_request(prefix, nexthops, true)
            .execute()
            .await
            .map_err(io_error)
    }

    async fn ip_route_uninstall(
        &self,
        prefix: &Ipv4Network,
    ) -> std::io::Result<()> {
        let mut request = self
            .handle
            .route()
            .add()
            .protocol(NETLINK_PROTO_BOOT)
            .v4()
            .destination_prefix(prefix.ip(), prefix.prefix());

        let request = self.handle.route().del(request.message_mut().clone());
        request.execute().await.map_err(io_error)
    }

    async fn ip_route_exists(
        &self,
        prefix: &Ipv4Network,
    ) -> std::io::Result<bool> {
        let mut routes = self.handle.route().get(IpVersion::V4).execute();
        while let Some(route) = routes.try_next().await.map_err(io_error)? {
            if route.header.table != RT_TABLE_MAIN
                || route.header.destination_prefix_length != prefix.prefix()
            {
                continue;
            }

            let dst = route.nlas.iter().find_map(|nla| match nla {
                Nla::Destination(dst) if dst.len() == 4 => {
                    Some(Ipv4Addr::new(dst[0], dst[1], dst[2], dst[3]))
                }
                _ => None,
            });
            match dst {
                Some(dst) if dst == prefix.ip() => return Ok(true),
                // The default route carries no destination attribute.
                None if prefix.prefix() == 0 => return Ok(true),
                _ => (),
            }
        }
        Ok(false)
    }
}

// ===== global functions =====

// Opens the shared netlink connection, serving its requests on a background
// task, and returns the handle used to issue requests.
pub fn init() -> std::io::Result<Handle> {
    let (conn, handle, _) = new_connection()?;
    tokio::task::spawn(conn);
    Ok(handle)
}

// Encodes the RTA_MULTIPATH payload: one rtnexthop header plus one gateway
// attribute per next-hop.
fn multipath(nexthops: &[Nexthop]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(
        nexthops.len() * (RTNH_LEN + RTA_GATEWAY_LEN) as usize,
    );
    for nexthop in nexthops {
        // struct rtnexthop
        buf.put_u16_ne(RTNH_LEN + RTA_GATEWAY_LEN); // rtnh_len
        buf.put_u8(0); // rtnh_flags
        buf.put_u8(0); // rtnh_hops
        buf.put_i32_ne(0); // rtnh_ifindex
        // struct rtattr + gateway address
        buf.put_u16_ne(RTA_GATEWAY_LEN);
        buf.put_u16_ne(RTA_GATEWAY);
        buf.put_slice(&nexthop.gw.octets());
    }
    buf
}

fn io_error(error: rtnetlink::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, error.to_string())
}
