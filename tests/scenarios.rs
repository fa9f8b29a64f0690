//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ipnetwork::Ipv4Network;
use nrd::config::{Config, RoutePrefix};
use nrd::events;
use nrd::instance::Instance;
use nrd::notify::ReadinessNotifier;
use nrd::southbound::{Nexthop, RouteSouthbound};
use nrd::tasks::messages::ProtocolMsg;
use tokio::sync::mpsc::UnboundedReceiver;

const DEAD_INTERVAL: Duration = Duration::from_secs(10);

// ===== test fixtures =====

// Kernel mutations in the order the fake kernel received them.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Op {
    Install(Ipv4Network, Vec<Ipv4Addr>),
    Replace(Ipv4Network, Vec<Ipv4Addr>),
    Delete(Ipv4Network),
}

// In-memory kernel routing table recording every successful mutation.
#[derive(Debug, Default)]
struct FakeKernel {
    ops: Mutex<Vec<Op>>,
    preexisting: Mutex<BTreeSet<Ipv4Network>>,
    fail_mutations: Mutex<bool>,
    fail_listing: Mutex<bool>,
}

impl FakeKernel {
    fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    fn preexist(&self, prefix: Ipv4Network) {
        self.preexisting.lock().unwrap().insert(prefix);
    }

    fn set_fail_mutations(&self, fail: bool) {
        *self.fail_mutations.lock().unwrap() = fail;
    }

    fn set_fail_listing(&self, fail: bool) {
        *self.fail_listing.lock().unwrap() = fail;
    }

    fn check_fail(&self) -> std::io::Result<()> {
        if *self.fail_mutations.lock().unwrap() {
            return Err(std::io::Error::from_raw_os_error(libc::ENETDOWN));
        }
        Ok(())
    }
}

#[async_trait]
impl RouteSouthbound for FakeKernel {
    async fn ip_route_install(
        &self,
        prefix: &Ipv4Network,
        nexthops: &[Nexthop],
    ) -> std::io::Result<()> {
        self.check_fail()?;
        self.ops
            .lock()
            .unwrap()
            .push(Op::Install(*prefix, gateways(nexthops)));
        Ok(())
    }

    async fn ip_route_replace(
        &self,
        prefix: &Ipv4Network,
        nexthops: &[Nexthop],
    ) -> std::io::Result<()> {
        self.check_fail()?;
        self.ops
            .lock()
            .unwrap()
            .push(Op::Replace(*prefix, gateways(nexthops)));
        Ok(())
    }

    async fn ip_route_uninstall(
        &self,
        prefix: &Ipv4Network,
    ) -> std::io::Result<()> {
        self.check_fail()?;
        self.ops.lock().unwrap().push(Op::Delete(*prefix));
        Ok(())
    }

    async fn ip_route_exists(
        &self,
        prefix: &Ipv4Network,
    ) -> std::io::Result<bool> {
        if *self.fail_listing.lock().unwrap() {
            return Err(std::io::Error::from_raw_os_error(libc::ENOBUFS));
        }
        Ok(self.preexisting.lock().unwrap().contains(prefix))
    }
}

// Readiness notifier counting how many opportunities it was offered.
#[derive(Debug, Default)]
struct FakeNotifier {
    calls: Mutex<u32>,
}

impl FakeNotifier {
    fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

impl ReadinessNotifier for FakeNotifier {
    fn notify_ready(&self) {
        *self.calls.lock().unwrap() += 1;
    }
}

// ===== helper functions =====

fn prefix(s: &str) -> Ipv4Network {
    s.parse::<RoutePrefix>().unwrap().0
}

fn addr(s: &str) -> Ipv4Addr {
    s.parse().unwrap()
}

fn gateways(nexthops: &[Nexthop]) -> Vec<Ipv4Addr> {
    nexthops.iter().map(|nexthop| nexthop.gw).collect()
}

fn config(routes: &[&str], routers: &[&str]) -> Config {
    Config {
        iface: "eth0".to_owned(),
        dead: DEAD_INTERVAL,
        routes: routes.iter().map(|r| r.parse().unwrap()).collect(),
        routers: routers.iter().map(|r| r.parse().unwrap()).collect(),
        notify: true,
        up: false,
        nojoin: true,
        dry_run: false,
        force: false,
        noclean: false,
    }
}

async fn init(
    config: Config,
    kernel: &Arc<FakeKernel>,
    notifier: &Arc<FakeNotifier>,
) -> (Instance, UnboundedReceiver<ProtocolMsg>) {
    Instance::init(config, kernel.clone(), notifier.clone()).await
}

// Lets spawned tasks run without advancing the paused clock.
async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

// Dispatches every pending engine input event.
async fn drain(
    instance: &Instance,
    proto_input_rx: &mut UnboundedReceiver<ProtocolMsg>,
) {
    settle().await;
    while let Ok(msg) = proto_input_rx.try_recv() {
        events::process(instance, msg);
        settle().await;
    }
}

async fn hello(instance: &Instance, router: &str) {
    instance.routers.get(&addr(router)).unwrap().hello().await;
}

// ===== scenarios =====

// S1: no Hello ever arrives, so the kernel is never touched and readiness
// never fires.
#[tokio::test(start_paused = true)]
async fn s1_cold_join_without_hello() {
    let kernel = Arc::new(FakeKernel::default());
    let notifier = Arc::new(FakeNotifier::default());
    let config = config(&["10.0.0.0/24"], &["10.1.1.1"]);
    let (instance, mut rx) = init(config, &kernel, &notifier).await;

    drain(&instance, &mut rx).await;
    assert!(kernel.ops().is_empty());
    assert_eq!(notifier.calls(), 0);
    assert!(!instance.routers[&addr("10.1.1.1")].is_up().await);
}

// S2: the first Hello brings the router up and installs the route.
#[tokio::test(start_paused = true)]
async fn s2_hello_installs_route() {
    let kernel = Arc::new(FakeKernel::default());
    let notifier = Arc::new(FakeNotifier::default());
    let config = config(&["10.0.0.0/24"], &["10.1.1.1"]);
    let (instance, _rx) = init(config, &kernel, &notifier).await;

    hello(&instance, "10.1.1.1").await;

    assert_eq!(
        kernel.ops(),
        vec![Op::Install(prefix("10.0.0.0/24"), vec![addr("10.1.1.1")])]
    );
    assert_eq!(instance.counters.routes_up(), 1);
    assert_eq!(instance.counters.routers_up(), 1);
    assert!(notifier.calls() > 0);

    let route = &instance.routes["10.0.0.0/24"];
    assert!(route.is_up().await);
    assert_eq!(route.nexthops().await, vec![addr("10.1.1.1")]);
}

// S3: silence for a full dead interval deletes the route again.
#[tokio::test(start_paused = true)]
async fn s3_dead_timer_deletes_route() {
    let kernel = Arc::new(FakeKernel::default());
    let notifier = Arc::new(FakeNotifier::default());
    let config = config(&["10.0.0.0/24"], &["10.1.1.1"]);
    let (instance, mut rx) = init(config, &kernel, &notifier).await;

    hello(&instance, "10.1.1.1").await;
    tokio::time::advance(DEAD_INTERVAL + Duration::from_secs(1)).await;
    drain(&instance, &mut rx).await;

    assert_eq!(
        kernel.ops(),
        vec![
            Op::Install(prefix("10.0.0.0/24"), vec![addr("10.1.1.1")]),
            Op::Delete(prefix("10.0.0.0/24")),
        ]
    );
    assert_eq!(instance.counters.routes_up(), 0);
    assert_eq!(instance.counters.routers_up(), 0);
    assert!(!instance.routers[&addr("10.1.1.1")].is_up().await);
    assert!(!instance.routes["10.0.0.0/24"].is_up().await);
}

// S4: a second live router turns the route into a multipath replace.
#[tokio::test(start_paused = true)]
async fn s4_multipath_replace() {
    let kernel = Arc::new(FakeKernel::default());
    let notifier = Arc::new(FakeNotifier::default());
    let config = config(&["10.0.0.0/24"], &["10.1.1.1", "10.1.1.2"]);
    let (instance, _rx) = init(config, &kernel, &notifier).await;

    hello(&instance, "10.1.1.1").await;
    hello(&instance, "10.1.1.2").await;

    assert_eq!(
        kernel.ops(),
        vec![
            Op::Install(prefix("10.0.0.0/24"), vec![addr("10.1.1.1")]),
            Op::Replace(
                prefix("10.0.0.0/24"),
                vec![addr("10.1.1.1"), addr("10.1.1.2")]
            ),
        ]
    );
}

// Repeated Hellos on an up router only refresh the dead timer.
#[tokio::test(start_paused = true)]
async fn hello_is_idempotent() {
    let kernel = Arc::new(FakeKernel::default());
    let notifier = Arc::new(FakeNotifier::default());
    let config = config(&["10.0.0.0/24"], &["10.1.1.1"]);
    let (instance, mut rx) = init(config, &kernel, &notifier).await;

    for _ in 0..3 {
        hello(&instance, "10.1.1.1").await;
    }
    drain(&instance, &mut rx).await;

    assert_eq!(kernel.ops().len(), 1);
    assert_eq!(
        instance.routes["10.0.0.0/24"].nexthops().await,
        vec![addr("10.1.1.1")]
    );
}

// A Hello within the dead interval keeps the router alive.
#[tokio::test(start_paused = true)]
async fn hello_refreshes_dead_timer() {
    let kernel = Arc::new(FakeKernel::default());
    let notifier = Arc::new(FakeNotifier::default());
    let config = config(&["10.0.0.0/24"], &["10.1.1.1"]);
    let (instance, mut rx) = init(config, &kernel, &notifier).await;

    hello(&instance, "10.1.1.1").await;
    for _ in 0..3 {
        tokio::time::advance(DEAD_INTERVAL / 2).await;
        drain(&instance, &mut rx).await;
        hello(&instance, "10.1.1.1").await;
    }

    assert!(instance.routers[&addr("10.1.1.1")].is_up().await);
    assert_eq!(kernel.ops().len(), 1);
}

// S5: a pre-existing route is dropped from management without --force.
#[tokio::test(start_paused = true)]
async fn s5_takeover_requires_force() {
    let kernel = Arc::new(FakeKernel::default());
    let notifier = Arc::new(FakeNotifier::default());
    kernel.preexist(prefix("10.0.0.0/24"));

    let config = config(&["10.0.0.0/24"], &["10.1.1.1"]);
    let (instance, _rx) = init(config, &kernel, &notifier).await;

    assert!(instance.routes.is_empty());
    hello(&instance, "10.1.1.1").await;
    assert!(kernel.ops().is_empty());
}

// S5: with --force, the first mutation of a taken-over route is a replace.
#[tokio::test(start_paused = true)]
async fn s5_takeover_with_force_replaces() {
    let kernel = Arc::new(FakeKernel::default());
    let notifier = Arc::new(FakeNotifier::default());
    kernel.preexist(prefix("10.0.0.0/24"));

    let mut config = config(&["10.0.0.0/24"], &["10.1.1.1"]);
    config.force = true;
    let (instance, _rx) = init(config, &kernel, &notifier).await;

    assert_eq!(instance.routes.len(), 1);
    hello(&instance, "10.1.1.1").await;
    assert_eq!(
        kernel.ops(),
        vec![Op::Replace(prefix("10.0.0.0/24"), vec![addr("10.1.1.1")])]
    );
}

// A listing failure is treated as a conflicting route.
#[tokio::test(start_paused = true)]
async fn takeover_check_fails_closed() {
    let kernel = Arc::new(FakeKernel::default());
    let notifier = Arc::new(FakeNotifier::default());
    kernel.set_fail_listing(true);

    let config = config(&["10.0.0.0/24"], &["10.1.1.1"]);
    let (instance, _rx) = init(config, &kernel, &notifier).await;
    assert!(instance.routes.is_empty());
}

// S6: shutdown removes every managed route unless --noclean is set.
#[tokio::test(start_paused = true)]
async fn s6_shutdown_cleans_up() {
    let kernel = Arc::new(FakeKernel::default());
    let notifier = Arc::new(FakeNotifier::default());
    let config = config(&["10.0.0.0/24"], &["10.1.1.1"]);
    let (instance, _rx) = init(config, &kernel, &notifier).await;

    hello(&instance, "10.1.1.1").await;
    instance.shutdown().await;

    assert_eq!(
        kernel.ops().last(),
        Some(&Op::Delete(prefix("10.0.0.0/24")))
    );
}

#[tokio::test(start_paused = true)]
async fn s6_shutdown_noclean_keeps_routes() {
    let kernel = Arc::new(FakeKernel::default());
    let notifier = Arc::new(FakeNotifier::default());
    let mut config = config(&["10.0.0.0/24"], &["10.1.1.1"]);
    config.noclean = true;
    let (instance, _rx) = init(config, &kernel, &notifier).await;

    hello(&instance, "10.1.1.1").await;
    instance.shutdown().await;

    assert_eq!(
        kernel.ops(),
        vec![Op::Install(prefix("10.0.0.0/24"), vec![addr("10.1.1.1")])]
    );
}

// --up installs routes with every configured gateway at startup.
#[tokio::test(start_paused = true)]
async fn startup_up_installs_all_gateways() {
    let kernel = Arc::new(FakeKernel::default());
    let notifier = Arc::new(FakeNotifier::default());
    let mut config = config(&["10.0.0.0/24"], &["10.1.1.1", "10.1.1.2"]);
    config.up = true;
    let (instance, mut rx) = init(config, &kernel, &notifier).await;

    assert_eq!(
        kernel.ops(),
        vec![
            Op::Install(prefix("10.0.0.0/24"), vec![addr("10.1.1.1")]),
            Op::Replace(
                prefix("10.0.0.0/24"),
                vec![addr("10.1.1.1"), addr("10.1.1.2")]
            ),
        ]
    );
    assert_eq!(instance.counters.routers_up(), 2);

    // The pending dead timers take silent routers back down.
    tokio::time::advance(DEAD_INTERVAL + Duration::from_secs(1)).await;
    drain(&instance, &mut rx).await;
    assert_eq!(instance.counters.routers_up(), 0);
    assert_eq!(kernel.ops().last(), Some(&Op::Delete(prefix("10.0.0.0/24"))));
}

// Readiness fires only when the live-route count reaches the managed total.
#[tokio::test(start_paused = true)]
async fn readiness_fires_at_full_up() {
    let kernel = Arc::new(FakeKernel::default());
    let notifier = Arc::new(FakeNotifier::default());
    let config = config(&["10.0.0.0/24", "10.0.1.0/24"], &["10.1.1.1"]);
    let (instance, _rx) = init(config, &kernel, &notifier).await;

    assert_eq!(notifier.calls(), 0);
    hello(&instance, "10.1.1.1").await;

    // Both routes came up through the single router transition, and the
    // notifier was offered an opportunity exactly at full-up.
    assert_eq!(instance.counters.routes_up(), 2);
    assert_eq!(notifier.calls(), 1);
}

// A failed kernel mutation leaves the logical state untouched and the next
// membership change retries.
#[tokio::test(start_paused = true)]
async fn kernel_error_retried_on_next_change() {
    let kernel = Arc::new(FakeKernel::default());
    let notifier = Arc::new(FakeNotifier::default());
    let config = config(&["10.0.0.0/24"], &["10.1.1.1", "10.1.1.2"]);
    let (instance, _rx) = init(config, &kernel, &notifier).await;

    kernel.set_fail_mutations(true);
    hello(&instance, "10.1.1.1").await;
    assert!(kernel.ops().is_empty());
    assert!(!instance.routes["10.0.0.0/24"].is_up().await);
    assert_eq!(instance.counters.routes_up(), 0);

    kernel.set_fail_mutations(false);
    hello(&instance, "10.1.1.2").await;
    assert_eq!(
        kernel.ops(),
        vec![Op::Install(
            prefix("10.0.0.0/24"),
            vec![addr("10.1.1.1"), addr("10.1.1.2")]
        )]
    );
    assert!(instance.routes["10.0.0.0/24"].is_up().await);
}

// Add followed by del is a no-op with respect to membership and leaves the
// route down again.
#[tokio::test(start_paused = true)]
async fn add_del_round_trip() {
    let kernel = Arc::new(FakeKernel::default());
    let notifier = Arc::new(FakeNotifier::default());
    let config = config(&["10.0.0.0/24"], &[]);
    let (instance, _rx) = init(config, &kernel, &notifier).await;

    let route = &instance.routes["10.0.0.0/24"];
    route.add(addr("10.1.1.1")).await;
    route.del(addr("10.1.1.1")).await;

    assert!(route.nexthops().await.is_empty());
    assert!(!route.is_up().await);
    assert_eq!(
        kernel.ops(),
        vec![
            Op::Install(prefix("10.0.0.0/24"), vec![addr("10.1.1.1")]),
            Op::Delete(prefix("10.0.0.0/24")),
        ]
    );
}

// --dry drives the full logical state machine but never issues the kernel
// mutation.
#[tokio::test(start_paused = true)]
async fn dry_run_skips_kernel_mutations() {
    let kernel = Arc::new(FakeKernel::default());
    let notifier = Arc::new(FakeNotifier::default());
    let mut config = config(&["10.0.0.0/24"], &["10.1.1.1"]);
    config.dry_run = true;
    let (instance, mut rx) = init(config, &kernel, &notifier).await;

    hello(&instance, "10.1.1.1").await;
    assert!(instance.routers[&addr("10.1.1.1")].is_up().await);
    assert_eq!(instance.counters.routers_up(), 1);
    assert!(kernel.ops().is_empty());

    // The route tracks liveness logically even though the kernel was never
    // touched.
    let route = &instance.routes["10.0.0.0/24"];
    assert!(route.is_up().await);
    assert_eq!(route.nexthops().await, vec![addr("10.1.1.1")]);
    assert_eq!(instance.counters.routes_up(), 1);

    tokio::time::advance(DEAD_INTERVAL + Duration::from_secs(1)).await;
    drain(&instance, &mut rx).await;
    assert!(!instance.routers[&addr("10.1.1.1")].is_up().await);
    assert!(!route.is_up().await);
    assert!(route.nexthops().await.is_empty());
    assert_eq!(instance.counters.routes_up(), 0);
    assert!(kernel.ops().is_empty());
}

// At quiescence, a router's address is a next-hop of every managed route
// exactly when the router is up.
#[tokio::test(start_paused = true)]
async fn router_membership_matches_liveness() {
    let kernel = Arc::new(FakeKernel::default());
    let notifier = Arc::new(FakeNotifier::default());
    let config = config(
        &["10.0.0.0/24", "10.0.1.0/24"],
        &["10.1.1.1", "10.1.1.2"],
    );
    let (instance, mut rx) = init(config, &kernel, &notifier).await;

    hello(&instance, "10.1.1.1").await;
    hello(&instance, "10.1.1.2").await;
    tokio::time::advance(DEAD_INTERVAL + Duration::from_secs(1)).await;
    drain(&instance, &mut rx).await;
    hello(&instance, "10.1.1.2").await;

    for router in instance.routers.values() {
        for route in instance.routes.values() {
            let member = route.nexthops().await.contains(&router.ip);
            assert_eq!(member, router.is_up().await);
        }
    }
    assert!(!instance.routers[&addr("10.1.1.1")].is_up().await);
    assert!(instance.routers[&addr("10.1.1.2")].is_up().await);
}
