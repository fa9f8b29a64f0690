//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use crate::debug::Debug;
use crate::error::Error;
use crate::instance::Instance;
use crate::packet::PacketType;
use crate::tasks::messages::{DeadTimerMsg, NetRxPacketMsg, ProtocolMsg};

// Demultiplexes one engine input event.
//
// Hello and dead-timer handling run on independent tasks so that packet
// intake is never throttled by route lock contention.
pub fn process(instance: &Instance, msg: ProtocolMsg) {
    match msg {
        ProtocolMsg::NetRxPacket(msg) => process_packet(instance, msg),
        ProtocolMsg::DeadTimer(msg) => process_dead_timer(instance, msg),
    }
}

// ===== Network packet receipt =====

fn process_packet(instance: &Instance, msg: NetRxPacketMsg) {
    let NetRxPacketMsg { src, packet } = msg;

    let packet = match packet {
        Ok(packet) => packet,
        Err(error) => {
            Error::PacketDecodeError(error).log();
            return;
        }
    };
    Debug::PacketRx(&src, &packet).log();

    if packet.pkt_type != PacketType::Hello {
        Error::NonHelloPacket(src, packet.pkt_type).log();
        return;
    }

    match instance.routers.get(&src) {
        Some(router) => {
            let router = router.clone();
            tokio::task::spawn(async move {
                router.hello().await;
            });
        }
        None => {
            Error::UnknownRouter(src).log();
        }
    }
}

// ===== Dead-timer expiry =====

fn process_dead_timer(instance: &Instance, msg: DeadTimerMsg) {
    if let Some(router) = instance.routers.get(&msg.router) {
        let router = router.clone();
        tokio::task::spawn(async move {
            router.dead().await;
        });
    }
}
