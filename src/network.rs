//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::os::unix::io::AsRawFd;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::LazyLock as Lazy;

use nix::sys::socket::{self, SockaddrIn};
use socket2::{Domain, InterfaceIndexOrAddress, Protocol, Socket, Type};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::sync::mpsc::error::SendError;
use tokio::sync::mpsc::UnboundedSender;

use crate::debug::Debug;
use crate::error::IoError;
use crate::packet;
use crate::tasks::messages::{NetRxPacketMsg, ProtocolMsg};

// OSPF IP protocol number.
pub const OSPF_IP_PROTO: i32 = 89;

// OSPFv2 AllSPFRouters multicast address.
pub static ALL_SPF_RTRS: Lazy<Ipv4Addr> =
    Lazy::new(|| Ipv4Addr::from_str("224.0.0.5").unwrap());

// Creates the raw socket used to passively observe OSPF packets on the
// given interface.
pub fn socket(ifname: &str) -> Result<Socket, std::io::Error> {
    let socket = Socket::new(
        Domain::IPV4,
        Type::RAW,
        Some(Protocol::from(OSPF_IP_PROTO)),
    )?;

    socket.set_nonblocking(true)?;
    socket.bind_device(Some(ifname.as_bytes()))?;
    socket.set_multicast_loop_v4(false)?;

    Ok(socket)
}

// Joins the AllSPFRouters multicast group on the given interface.
pub fn join_multicast(
    socket: &Socket,
    ifindex: u32,
) -> Result<(), std::io::Error> {
    socket.join_multicast_v4_n(
        &ALL_SPF_RTRS,
        &InterfaceIndexOrAddress::Index(ifindex),
    )
}

// Receive loop: decodes each datagram and forwards the result to the
// engine task, keyed by the source address from the IP header.
pub(crate) async fn read_loop(
    socket: Arc<AsyncFd<Socket>>,
    proto_input_tx: UnboundedSender<ProtocolMsg>,
) -> Result<(), SendError<ProtocolMsg>> {
    let mut buf = [0u8; 16384];

    loop {
        // Receive data packet.
        let (num_bytes, src) = match socket
            .async_io(Interest::READABLE, |socket| {
                socket::recvfrom::<SockaddrIn>(socket.as_raw_fd(), &mut buf)
                    .map_err(|errno| {
                        std::io::Error::from_raw_os_error(errno as i32)
                    })
            })
            .await
        {
            Ok((num_bytes, src)) => (num_bytes, src),
            Err(error) => {
                IoError::RecvError(error).log();
                continue;
            }
        };

        // Retrieve source address.
        let src = match src {
            Some(sockaddr) => Ipv4Addr::from(sockaddr.ip()),
            None => {
                IoError::RecvMissingSourceAddr.log();
                continue;
            }
        };
        Debug::PacketRxRaw(&src, &buf[..num_bytes]).log();

        // Decode packet.
        let packet = packet::decode(&buf[..num_bytes]);

        let msg = NetRxPacketMsg { src, packet };
        proto_input_tx.send(ProtocolMsg::NetRxPacket(msg))?;
    }
}
