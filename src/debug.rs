//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use tracing::debug;

use crate::packet::PacketHdr;

// NRD debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    // Network
    PacketRxRaw(&'a Ipv4Addr, &'a [u8]),
    PacketRx(&'a Ipv4Addr, &'a PacketHdr),
    // Routers
    HelloRx(&'a Ipv4Addr),
    RouterAlreadyUp(&'a Ipv4Addr),
    RouterAlreadyDown(&'a Ipv4Addr),
    // Routes
    DryRunSkip(&'a Ipv4Network),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::PacketRxRaw(src, data) => {
                let data = data
                    .iter()
                    .map(|byte| format!("{:02x}", byte))
                    .collect::<String>();
                debug!(%src, %data, "{}", self);
            }
            Debug::PacketRx(src, packet) => {
                debug!(
                    %src,
                    pkt_type = ?packet.pkt_type,
                    router_id = %packet.router_id,
                    "{}", self
                );
            }
            Debug::HelloRx(router) => {
                debug!(%router, "{}", self);
            }
            Debug::RouterAlreadyUp(router)
            | Debug::RouterAlreadyDown(router) => {
                debug!(%router, "{}", self);
            }
            Debug::DryRunSkip(prefix) => {
                debug!(%prefix, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::PacketRxRaw(..) => {
                write!(f, "raw packet")
            }
            Debug::PacketRx(..) => {
                write!(f, "packet")
            }
            Debug::HelloRx(..) => {
                write!(f, "hello received")
            }
            Debug::RouterAlreadyUp(..) => {
                write!(f, "router up event, but the router is already up")
            }
            Debug::RouterAlreadyDown(..) => {
                write!(f, "router down event, but the router is already down")
            }
            Debug::DryRunSkip(..) => {
                write!(f, "dry run, not updating the kernel route")
            }
        }
    }
}
