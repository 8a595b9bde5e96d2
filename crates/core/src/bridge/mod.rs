// RoboWired - Robot MCU Co-Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Duplex bridge to the physics simulator process.
//!
//! One persistent seqpacket connection, two worker threads. The input
//! thread blocks in `recv` and hands every inbound packet to a registered
//! callback. The output thread sleeps on a condition variable guarding a
//! single outbound slot: producers overwrite the slot and signal, so a burst
//! of updates coalesces into one send of the latest state. There is no
//! queue; latest value wins.

pub mod proto;
pub mod socket;

pub use proto::{GuestState, InboundMessage, OutboundMessage, INBOUND_WIRE_SIZE};
pub use socket::Role;

use socket::SeqPacketConn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// Well-known abstract socket address shared with the simulator.
pub const SOCKET_PATH: &str = "@/robowired/board";

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("simulator socket open failed: {0}")]
    Open(#[source] std::io::Error),
    #[error("simulator handshake failed: {0}")]
    Handshake(#[source] std::io::Error),
}

#[derive(Debug)]
struct LinkShared {
    conn: SeqPacketConn,
    out_slot: Mutex<OutboundMessage>,
    out_cond: Condvar,
    stopping: AtomicBool,
    faulted: AtomicBool,
}

/// The live simulator connection. Owned by the board; dropping it stops and
/// joins both worker threads.
#[derive(Debug)]
pub struct SimLink {
    shared: Arc<LinkShared>,
    inp_thread: Option<JoinHandle<()>>,
    out_thread: Option<JoinHandle<()>>,
}

impl SimLink {
    /// Open the link and start both worker threads. The connection is
    /// established (accepting if we became the server) and the peer's
    /// handshake message is consumed before any thread runs.
    pub fn start<F>(path: &str, on_input: F) -> Result<Self, LinkError>
    where
        F: FnMut(InboundMessage, usize) + Send + 'static,
    {
        let conn = SeqPacketConn::open(path).map_err(LinkError::Open)?;
        tracing::info!("simulator link established ({:?})", conn.role());

        let mut hello = [0u8; 64];
        let n = conn
            .recv(&mut hello)
            .map_err(LinkError::Handshake)?
            .ok_or_else(|| {
                LinkError::Handshake(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed before handshake",
                ))
            })?;
        tracing::info!(
            "simulator handshake: \"{}\"",
            String::from_utf8_lossy(&hello[..n])
        );

        let shared = Arc::new(LinkShared {
            conn,
            out_slot: Mutex::new(OutboundMessage::default()),
            out_cond: Condvar::new(),
            stopping: AtomicBool::new(false),
            faulted: AtomicBool::new(false),
        });

        let inp_shared = shared.clone();
        let inp_thread = std::thread::Builder::new()
            .name("sim-link-inp".into())
            .spawn(move || input_loop(&inp_shared, on_input))
            .map_err(LinkError::Open)?;

        let out_shared = shared.clone();
        let out_thread = std::thread::Builder::new()
            .name("sim-link-out".into())
            .spawn(move || output_loop(&out_shared))
            .map_err(LinkError::Open)?;

        Ok(Self {
            shared,
            inp_thread: Some(inp_thread),
            out_thread: Some(out_thread),
        })
    }

    /// Publish the latest outbound state and wake the sender. Never blocks
    /// on the consumer; repeated posts before the sender wakes coalesce.
    pub fn post(&self, msg: OutboundMessage) {
        if let Ok(mut slot) = self.shared.out_slot.lock() {
            *slot = msg;
        }
        self.shared.out_cond.notify_one();
    }

    pub fn role(&self) -> Role {
        self.shared.conn.role()
    }

    /// Terminal I/O failure was observed on either worker.
    pub fn faulted(&self) -> bool {
        self.shared.faulted.load(Ordering::Acquire)
    }

    /// Stop both workers: raise the flag, wake the sender, unblock the
    /// receiver by shutting the socket down, then join. Idempotent.
    pub fn stop(&mut self) {
        if self.inp_thread.is_none() && self.out_thread.is_none() {
            return;
        }
        self.shared.stopping.store(true, Ordering::Release);
        self.shared.out_cond.notify_one();
        self.shared.conn.shutdown();
        if let Some(handle) = self.inp_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.out_thread.take() {
            let _ = handle.join();
        }
        tracing::info!("simulator link stopped");
    }
}

impl Drop for SimLink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn input_loop<F>(shared: &LinkShared, mut on_input: F)
where
    F: FnMut(InboundMessage, usize),
{
    let mut buf = [0u8; INBOUND_WIRE_SIZE];
    while !shared.stopping.load(Ordering::Acquire) {
        match shared.conn.recv(&mut buf) {
            Ok(Some(n)) => {
                // Short/zero records are degenerate keep-alives; the
                // callback decides what to do with them.
                let msg = InboundMessage::decode(&buf[..n]).unwrap_or_default();
                on_input(msg, n);
            }
            Ok(None) => {
                if shared.stopping.load(Ordering::Acquire) {
                    break;
                }
                tracing::info!("simulator closed the connection");
                shared.faulted.store(true, Ordering::Release);
                break;
            }
            Err(e) => {
                if shared.stopping.load(Ordering::Acquire) {
                    break;
                }
                tracing::error!("simulator receive failed: {}", e);
                shared.faulted.store(true, Ordering::Release);
                break;
            }
        }
    }
}

fn output_loop(shared: &LinkShared) {
    loop {
        let Ok(guard) = shared.out_slot.lock() else {
            break;
        };
        let Ok(guard) = shared.out_cond.wait(guard) else {
            break;
        };
        if shared.stopping.load(Ordering::Acquire) {
            break;
        }
        // Send while holding the slot: the packet on the wire is exactly the
        // latest posted state.
        if let Err(e) = shared.conn.send(&guard.encode()) {
            tracing::error!("simulator send failed: {}", e);
            shared.faulted.store(true, Ordering::Release);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn try_recv(conn: &SeqPacketConn, buf: &mut [u8]) -> Option<usize> {
        // Poll with a deadline so a missing message fails the test instead
        // of hanging it.
        for _ in 0..100 {
            match conn.recv_nonblocking(buf) {
                Ok(Some(n)) => return Some(n),
                _ => std::thread::sleep(Duration::from_millis(5)),
            }
        }
        None
    }

    #[test]
    fn test_rapid_posts_coalesce_into_one_send() {
        let (ours, theirs) = SeqPacketConn::pair().expect("socketpair");
        let shared = Arc::new(LinkShared {
            conn: ours,
            out_slot: Mutex::new(OutboundMessage::default()),
            out_cond: Condvar::new(),
            stopping: AtomicBool::new(false),
            faulted: AtomicBool::new(false),
        });

        let worker = {
            let shared = shared.clone();
            std::thread::spawn(move || output_loop(&shared))
        };
        // Let the worker park in its condition wait before signaling.
        std::thread::sleep(Duration::from_millis(50));

        // Hold the slot mutex across all five signals: the worker cannot
        // re-acquire it mid-burst, so the wakeups collapse into one.
        {
            let mut slot = shared.out_slot.lock().expect("slot");
            for i in 1..=5u64 {
                slot.virtual_time_ns = i;
                shared.out_cond.notify_one();
            }
        }

        let mut buf = [0u8; 64];
        let n = try_recv(&theirs, &mut buf).expect("one packet");
        let msg = OutboundMessage::decode(&buf[..n]).expect("decode");
        assert_eq!(msg.virtual_time_ns, 5);

        // Exactly one send: nothing else is in flight.
        std::thread::sleep(Duration::from_millis(30));
        assert!(theirs.recv_nonblocking(&mut buf).is_err());

        shared.stopping.store(true, Ordering::Release);
        shared.out_cond.notify_one();
        worker.join().expect("worker join");
    }

    #[test]
    fn test_input_loop_faults_on_receive_error() {
        let (ours, theirs) = SeqPacketConn::pair().expect("socketpair");
        let shared = Arc::new(LinkShared {
            conn: ours,
            out_slot: Mutex::new(OutboundMessage::default()),
            out_cond: Condvar::new(),
            stopping: AtomicBool::new(false),
            faulted: AtomicBool::new(false),
        });

        let seen = Arc::new(Mutex::new(Vec::new()));
        let worker = {
            let shared = shared.clone();
            let seen = seen.clone();
            std::thread::spawn(move || {
                input_loop(&shared, move |msg, n| {
                    if let Ok(mut seen) = seen.lock() {
                        seen.push((msg.state, n));
                    }
                })
            })
        };

        let msg = InboundMessage {
            state: GuestState::Running,
            ..Default::default()
        };
        theirs.send(&msg.encode()).expect("send");
        std::thread::sleep(Duration::from_millis(30));
        drop(theirs); // closes the peer

        let _ = worker.join();
        assert!(shared.faulted.load(Ordering::Acquire));
        let seen = seen.lock().expect("seen");
        assert_eq!(seen.first(), Some(&(GuestState::Running, INBOUND_WIRE_SIZE)));
    }
}
