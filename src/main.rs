//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

use std::net::Ipv4Addr;
use std::sync::Arc;

use clap::{crate_version, Arg, ArgAction, Command};
use nix::unistd::Uid;
use tracing::{error, info};
use tracing_subscriber::filter::LevelFilter;

use nrd::config::{Config, ConfigFile};
use nrd::instance::Instance;
use nrd::notify::SdNotifier;
use nrd::{netlink, network};

fn init_tracing(level: LevelFilter) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();
}

// First IPv4 address assigned to the given interface.
fn interface_ipv4(ifname: &str) -> Option<Ipv4Addr> {
    let addrs = nix::ifaddrs::getifaddrs().ok()?;
    addrs
        .filter(|ifaddr| ifaddr.interface_name == ifname)
        .find_map(|ifaddr| {
            ifaddr.address.and_then(|addr| {
                addr.as_sockaddr_in()
                    .map(|sockaddr| Ipv4Addr::from(sockaddr.ip()))
            })
        })
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = Command::new("nrd")
        .about("Neighborless route detection daemon")
        .version(crate_version!())
        .arg(
            Arg::new("iface")
                .long("iface")
                .value_name("name")
                .default_value("eth0")
                .help("Interface to listen on."),
        )
        .arg(
            Arg::new("conf")
                .long("conf")
                .value_name("file")
                .default_value(ConfigFile::DFLT_FILEPATH)
                .help("Configuration file to use."),
        )
        .arg(
            Arg::new("log")
                .long("log")
                .value_name("level")
                .value_parser(clap::value_parser!(u8).range(0..=3))
                .default_value("2")
                .help("Log level: 0=error, 1=warn, 2=info, 3=debug."),
        )
        .arg(
            Arg::new("notify")
                .long("notify")
                .action(ArgAction::SetTrue)
                .help("Send sd_notify readiness when all routes are up."),
        )
        .arg(
            Arg::new("up")
                .long("up")
                .action(ArgAction::SetTrue)
                .help("Set the startup state of every router to up."),
        )
        .arg(
            Arg::new("nojoin")
                .long("nojoin")
                .action(ArgAction::SetTrue)
                .help("Skip the multicast group join (assume it is already joined)."),
        )
        .arg(
            Arg::new("dry")
                .long("dry")
                .action(ArgAction::SetTrue)
                .help("Dry run, never set routes from router transitions."),
        )
        .arg(
            Arg::new("force")
                .long("force")
                .action(ArgAction::SetTrue)
                .help("Take over managed routes even if they already exist."),
        )
        .arg(
            Arg::new("noclean")
                .long("noclean")
                .action(ArgAction::SetTrue)
                .help("Do not remove managed routes on exit."),
        )
        .get_matches();

    // Initialize tracing.
    let log_level = match *matches.get_one::<u8>("log").unwrap() {
        0 => LevelFilter::ERROR,
        1 => LevelFilter::WARN,
        2 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    };
    init_tracing(log_level);
    info!("starting nrd");

    // Check for root privileges. Both the raw socket and the kernel routing
    // table require them.
    if !Uid::effective().is_root() {
        error!("must be run with root privilege");
        std::process::exit(1);
    }

    // Read configuration file.
    let config_file = matches.get_one::<String>("conf").unwrap();
    info!(path = %config_file, "reading configuration file");
    let file = match ConfigFile::load(config_file) {
        Ok(file) => file,
        Err(error) => {
            error!(%error, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let config = Config {
        iface: matches.get_one::<String>("iface").unwrap().clone(),
        dead: file.dead,
        routes: file.routes,
        routers: file.routers,
        notify: matches.get_flag("notify"),
        up: matches.get_flag("up"),
        nojoin: matches.get_flag("nojoin"),
        dry_run: matches.get_flag("dry"),
        force: matches.get_flag("force"),
        noclean: matches.get_flag("noclean"),
    };

    // Resolve the listening interface.
    let ifindex = match nix::net::if_::if_nametoindex(config.iface.as_str()) {
        Ok(ifindex) => ifindex,
        Err(error) => {
            error!(interface = %config.iface, %error, "failed to find interface");
            std::process::exit(1);
        }
    };
    let ifaddr = match interface_ipv4(&config.iface) {
        Some(ifaddr) => ifaddr,
        None => {
            error!(interface = %config.iface, "interface has no IPv4 address");
            std::process::exit(1);
        }
    };
    info!(interface = %config.iface, address = %ifaddr, "using interface");

    // Set panic handler to abort the process if any child task panics.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        std::process::exit(1);
    }));

    // Main loop.
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(async move {
            run(config, ifindex).await;
        });
}

async fn run(config: Config, ifindex: u32) {
    // Kernel routing table southbound.
    let handle = match netlink::init() {
        Ok(handle) => handle,
        Err(error) => {
            error!(%error, "failed to open netlink socket");
            std::process::exit(1);
        }
    };
    let southbound = Arc::new(netlink::NetlinkSouthbound::new(handle));

    // Service-manager readiness notifier.
    let notifier = Arc::new(SdNotifier::new(config.notify));

    // OSPF raw socket.
    let socket = match network::socket(&config.iface) {
        Ok(socket) => socket,
        Err(error) => {
            error!(%error, "failed to open raw socket");
            std::process::exit(1);
        }
    };
    if !config.nojoin {
        if let Err(error) = network::join_multicast(&socket, ifindex) {
            error!(%error, "failed to join multicast group");
            std::process::exit(1);
        }
        info!(group = %*network::ALL_SPF_RTRS, "joined multicast group");
    }

    let (instance, proto_input_rx) =
        Instance::init(config, southbound, notifier).await;
    if let Err(error) = instance.run(proto_input_rx, socket).await {
        error!(%error, "failed to run the engine");
        std::process::exit(1);
    }
}
