//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

pub mod config;
pub mod debug;
pub mod error;
pub mod events;
pub mod instance;
pub mod netlink;
pub mod network;
pub mod notify;
pub mod packet;
pub mod route;
pub mod router;
pub mod southbound;
pub mod tasks;
