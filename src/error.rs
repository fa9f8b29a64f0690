//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use tracing::{debug, error, warn};

use crate::packet::{DecodeError, PacketType};

// NRD errors.
#[derive(Debug)]
pub enum Error {
    // I/O errors
    IoError(IoError),
    // Packet input
    PacketDecodeError(DecodeError),
    NonHelloPacket(Ipv4Addr, PacketType),
    UnknownRouter(Ipv4Addr),
    // Kernel routing table
    RouteExists(Ipv4Network),
    RouteInstallError(Ipv4Network, std::io::Error),
    RouteReplaceError(Ipv4Network, std::io::Error),
    RouteDeleteError(Ipv4Network, std::io::Error),
    RouteListError(Ipv4Network, std::io::Error),
    // Readiness notification
    NotifyUnsupported,
    NotifyError(std::io::Error),
}

// NRD I/O errors.
#[derive(Debug)]
pub enum IoError {
    RecvError(std::io::Error),
    RecvMissingSourceAddr,
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::IoError(error) => {
                error.log();
            }
            Error::PacketDecodeError(error) => {
                debug!(%error, "{}", self);
            }
            Error::NonHelloPacket(source, pkt_type) => {
                warn!(%source, ?pkt_type, "{}", self);
            }
            Error::UnknownRouter(source) => {
                warn!(%source, "{}", self);
            }
            Error::RouteExists(prefix) => {
                warn!(%prefix, "{}", self);
            }
            Error::RouteInstallError(prefix, error)
            | Error::RouteReplaceError(prefix, error)
            | Error::RouteDeleteError(prefix, error)
            | Error::RouteListError(prefix, error) => {
                error!(%prefix, %error, "{}", self);
            }
            Error::NotifyUnsupported => {
                warn!("{}", self);
            }
            Error::NotifyError(error) => {
                error!(%error, "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::IoError(error) => error.fmt(f),
            Error::PacketDecodeError(..) => {
                write!(f, "failed to decode packet")
            }
            Error::NonHelloPacket(..) => {
                write!(f, "received non-Hello OSPF packet")
            }
            Error::UnknownRouter(..) => {
                write!(f, "received Hello from unknown router")
            }
            Error::RouteExists(..) => {
                write!(
                    f,
                    "route already exists, dropping from the managed set \
                     (use --force to take over existing routes)"
                )
            }
            Error::RouteInstallError(..) => {
                write!(f, "failed to install route")
            }
            Error::RouteReplaceError(..) => {
                write!(f, "failed to replace route")
            }
            Error::RouteDeleteError(..) => {
                write!(f, "failed to delete route")
            }
            Error::RouteListError(..) => {
                write!(f, "failed to list routes")
            }
            Error::NotifyUnsupported => {
                write!(f, "readiness notification is not supported")
            }
            Error::NotifyError(..) => {
                write!(f, "failed to send readiness notification")
            }
        }
    }
}

impl std::error::Error for Error {}

// ===== impl IoError =====

impl IoError {
    pub(crate) fn log(&self) {
        match self {
            IoError::RecvError(error) => {
                error!(%error, "{}", self);
            }
            IoError::RecvMissingSourceAddr => {
                error!("{}", self);
            }
        }
    }
}

impl std::fmt::Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoError::RecvError(..) => {
                write!(f, "failed to receive packet")
            }
            IoError::RecvMissingSourceAddr => {
                write!(f, "failed to retrieve packet source address")
            }
        }
    }
}

impl std::error::Error for IoError {}
