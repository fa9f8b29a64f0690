//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use bytes::{Buf, Bytes};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

// Type aliases.
pub type DecodeResult<T> = Result<T, DecodeError>;

// OSPF Packet Type.
//
// IANA registry:
// https://www.iana.org/assignments/ospfv2-parameters/ospfv2-parameters.xhtml#ospfv2-parameters-3
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
pub enum PacketType {
    Hello = 0x01,
    DbDesc = 0x02,
    LsRequest = 0x03,
    LsUpdate = 0x04,
    LsAck = 0x05,
}

//
// OSPFv2 packet header.
//
// Encoding format:
//
//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |   Version #   |     Type      |         Packet length         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          Router ID                            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                           Area ID                             |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |           Checksum            |             AuType            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       Authentication                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       Authentication                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//
// Only the type field drives behavior. Checksum and authentication are not
// processed since packets are consumed passively.
//
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PacketHdr {
    pub pkt_type: PacketType,
    pub router_id: Ipv4Addr,
    pub area_id: Ipv4Addr,
}

// Packet decode errors.
#[derive(Debug, Eq, PartialEq)]
pub enum DecodeError {
    IncompletePacket,
    InvalidIpHdrLength(u16),
    InvalidVersion(u8),
    UnknownPacketType(u8),
}

// Minimum IPv4 header length.
const IP_HDR_MIN_LENGTH: u16 = 20;

// ===== impl PacketHdr =====

impl PacketHdr {
    pub const VERSION: u8 = 2;
    pub const LENGTH: u16 = 24;

    // Decodes the OSPFv2 packet header from a bytes buffer positioned past
    // the IP header.
    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.remaining() < Self::LENGTH as usize {
            return Err(DecodeError::IncompletePacket);
        }

        let version = buf.get_u8();
        if version != Self::VERSION {
            return Err(DecodeError::InvalidVersion(version));
        }

        let pkt_type = buf.get_u8();
        let pkt_type = PacketType::from_u8(pkt_type)
            .ok_or(DecodeError::UnknownPacketType(pkt_type))?;

        let _pkt_len = buf.get_u16();
        let router_id = Ipv4Addr::from(buf.get_u32());
        let area_id = Ipv4Addr::from(buf.get_u32());
        let _cksum = buf.get_u16();
        let _auth_type = buf.get_u16();
        let _auth = buf.get_u64();

        Ok(PacketHdr {
            pkt_type,
            router_id,
            area_id,
        })
    }
}

// ===== impl DecodeError =====

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::IncompletePacket => {
                write!(f, "incomplete packet")
            }
            DecodeError::InvalidIpHdrLength(len) => {
                write!(f, "invalid IP header length: {len}")
            }
            DecodeError::InvalidVersion(version) => {
                write!(f, "invalid OSPF version: {version}")
            }
            DecodeError::UnknownPacketType(pkt_type) => {
                write!(f, "unknown packet type: {pkt_type}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

// ===== global functions =====

// Validates the IP header of a received datagram and moves past it.
fn validate_ip_hdr(buf: &mut Bytes) -> DecodeResult<()> {
    if buf.remaining() < IP_HDR_MIN_LENGTH as usize {
        return Err(DecodeError::IncompletePacket);
    }
    let buf_len = buf.len() as u16;

    // Parse IHL (header length).
    let hdr_len = buf.get_u8() & 0x0F;
    if hdr_len < 5 {
        return Err(DecodeError::IncompletePacket);
    }

    // Ignore TOS.
    let _ = buf.get_u8();

    // Parse and validate the IP header total length.
    let total_len = buf.get_u16();
    if buf_len != total_len {
        return Err(DecodeError::InvalidIpHdrLength(total_len));
    }

    // Move past the IP header.
    let skip = ((hdr_len << 2) - 4) as usize;
    if buf.remaining() < skip {
        return Err(DecodeError::IncompletePacket);
    }
    buf.advance(skip);

    Ok(())
}

// Decodes the OSPFv2 packet header from a raw IP datagram.
pub fn decode(data: &[u8]) -> DecodeResult<PacketHdr> {
    let mut buf = Bytes::copy_from_slice(data);
    validate_ip_hdr(&mut buf)?;
    PacketHdr::decode(&mut buf)
}
