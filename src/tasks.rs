//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use socket2::Socket;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task;
use tracing::{error, Instrument};

use crate::network;
use crate::tasks::messages::ProtocolMsg;

//
// NRD tasks diagram:
//
//                                    +--------------+
//                     net_rx (1x) -> |              |
//                                    |    engine    |
//          router_dead_timer (Nx) -> |              |
//                                    +--------------+
//                                           |
//                                           V
//                                 routers -> routes -> kernel
//

// NRD inter-task message types.
pub mod messages {
    use std::net::Ipv4Addr;

    use crate::packet::{DecodeResult, PacketHdr};

    // Input messages (child task -> engine task).
    #[derive(Debug)]
    pub enum ProtocolMsg {
        NetRxPacket(NetRxPacketMsg),
        DeadTimer(DeadTimerMsg),
    }

    #[derive(Debug)]
    pub struct NetRxPacketMsg {
        pub src: Ipv4Addr,
        pub packet: DecodeResult<PacketHdr>,
    }

    #[derive(Debug)]
    pub struct DeadTimerMsg {
        pub router: Ipv4Addr,
    }
}

/// Handle to a background task. Dropping the handle aborts the task.
#[derive(Debug)]
pub(crate) struct Task {
    join_handle: task::JoinHandle<()>,
}

/// Handle to a cancellable one-shot timer. Dropping the handle disarms it.
#[derive(Debug)]
pub(crate) struct TimeoutTask {
    _task: Task,
}

// ===== impl Task =====

impl Task {
    fn spawn<Fut>(future: Fut) -> Task
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        Task {
            join_handle: task::spawn(future),
        }
    }

    // Keeps respawning the worker future as long as it dies by panic.
    // Malformed input read off the wire must not take the receive loop
    // down with it.
    fn spawn_supervised<F, Fut>(spawn_fn: F) -> Task
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Task::spawn(
            async move {
                loop {
                    let mut worker = Task::spawn(spawn_fn());
                    match (&mut worker.join_handle).await {
                        Ok(()) => break,
                        Err(error) if error.is_panic() => {
                            error!("task panicked, restarting...");
                        }
                        Err(error) => {
                            error!(%error, "task failed");
                            break;
                        }
                    }
                }
            }
            .in_current_span(),
        )
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        self.join_handle.abort();
    }
}

// ===== impl TimeoutTask =====

impl TimeoutTask {
    // Calls the provided async closure once the timeout expires.
    fn new<F, Fut>(timeout: Duration, cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = Task::spawn(
            async move {
                tokio::time::sleep(timeout).await;
                (cb)().await;
            }
            .in_current_span(),
        );

        TimeoutTask { _task: task }
    }
}

// ===== NRD tasks =====

// Network Rx task.
pub(crate) fn net_rx(
    socket: Arc<AsyncFd<Socket>>,
    proto_input_tx: &UnboundedSender<ProtocolMsg>,
) -> Task {
    let proto_input_tx = proto_input_tx.clone();
    Task::spawn_supervised(move || {
        let socket = socket.clone();
        let proto_input_tx = proto_input_tx.clone();
        async move {
            let _ = network::read_loop(socket, proto_input_tx).await;
        }
        .in_current_span()
    })
}

// Router dead-interval timer. Expiry is delivered to the engine task so that
// cancelling a timer never interrupts a transition in progress.
pub(crate) fn router_dead_timer(
    router: Ipv4Addr,
    dead_interval: Duration,
    proto_input_tx: &UnboundedSender<ProtocolMsg>,
) -> TimeoutTask {
    let proto_input_tx = proto_input_tx.clone();
    TimeoutTask::new(dead_interval, move || async move {
        let msg = messages::DeadTimerMsg { router };
        let _ = proto_input_tx.send(ProtocolMsg::DeadTimer(msg));
    })
}
