//! The single-socket receive loop: dispatch to the exchange state machine,
//! the offset store and the subscriber registry, and own the run/run_for
//! lifecycle.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cofetcher_proto::{advance, derive_offset, Packet};
use cofetcher_udp::Socket;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::debug;

use crate::clock::now_nanos;
use crate::subscriber::{SubscriberId, Subscribers};
use cofetcher_proto::{OffsetStore, PeerAddr};

/// `package_nr` of an incoming packet that makes its reply latency
/// sensitive: the initiator's second arrival, which should go back out
/// before the next `recv_from` is posted.
const LATENCY_SENSITIVE_INCOMING_STATE: i32 = 1;

struct Shared {
    store: OffsetStore,
    subscribers: Subscribers,
}

/// Owns the UDP socket and drives the receive loop.
pub(crate) struct Reactor {
    socket: Arc<Socket>,
    shared: Mutex<Shared>,
    send_tasks: Mutex<JoinSet<()>>,
    stopped: AtomicBool,
    stop_notify: Notify,
    driving: AtomicBool,
}

impl Reactor {
    pub(crate) fn new(socket: Socket, offset_counts: u16) -> Arc<Reactor> {
        Arc::new(Reactor {
            socket: Arc::new(socket),
            shared: Mutex::new(Shared {
                store: OffsetStore::new(offset_counts),
                subscribers: Subscribers::new(),
            }),
            send_tasks: Mutex::new(JoinSet::new()),
            stopped: AtomicBool::new(false),
            stop_notify: Notify::new(),
            driving: AtomicBool::new(false),
        })
    }

    /// The local address the underlying socket is bound to.
    pub(crate) fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub(crate) fn get_offset_for(&self, peer: PeerAddr) -> i32 {
        self.shared.lock().unwrap().store.estimate(&peer)
    }

    pub(crate) fn get_offsets(&self) -> HashMap<PeerAddr, i32> {
        self.shared.lock().unwrap().store.snapshot()
    }

    pub(crate) fn subscribe(
        &self,
        callback: impl crate::subscriber::Subscriber + 'static,
    ) -> SubscriberId {
        self.shared.lock().unwrap().subscribers.subscribe(callback)
    }

    pub(crate) fn unsubscribe(&self, id: SubscriberId) {
        self.shared.lock().unwrap().subscribers.unsubscribe(id);
    }

    pub(crate) fn num_callbacks(&self) -> usize {
        self.shared.lock().unwrap().subscribers.len()
    }

    /// Build and fire-and-forget send a fresh state-0 packet to `peer`.
    /// Used both for one-shot probes and as the payload of a repeating
    /// timer fire.
    pub(crate) fn send_probe(&self, peer: SocketAddr) {
        let packet = Packet::fresh(now_nanos());
        self.spawn_send(packet.encode().to_vec(), peer);
    }

    fn spawn_send(&self, bytes: Vec<u8>, peer: SocketAddr) {
        let socket = Arc::clone(&self.socket);
        self.send_tasks.lock().unwrap().spawn(async move {
            if let Err(error) = socket.send_to(&bytes, peer).await {
                debug!(?error, %peer, "send failed");
            }
        });
    }

    async fn handle_datagram(&self, bytes: Vec<u8>, peer: SocketAddr) {
        let mut packet = match Packet::decode(&bytes) {
            Ok(packet) => packet,
            Err(error) => {
                debug!(?error, %peer, "dropping malformed datagram");
                return;
            }
        };

        let incoming_state = packet.package_nr;
        let reply_required = advance(&mut packet, now_nanos());

        if reply_required {
            let bytes = packet.encode().to_vec();
            if incoming_state == LATENCY_SENSITIVE_INCOMING_STATE {
                // Sent synchronously, ahead of reposting the receive, to
                // keep the round-trip measurement this reply carries tight.
                if let Err(error) = self.socket.send_to(&bytes, peer).await {
                    debug!(?error, %peer, "synchronous reply failed");
                }
            } else {
                self.spawn_send(bytes, peer);
            }
        }

        if let Some(offset) = derive_offset(&packet) {
            // offset_store_lock and subscribers_lock are the same lock here:
            // taking one mutex around both operations is the simplest
            // correct joint-acquire primitive, and guarantees that the
            // smoothed offset a subscriber sees reflects exactly the
            // history change that triggered this fan-out.
            let mut shared = self.shared.lock().unwrap();
            shared.store.append(peer, offset);
            let smoothed = shared.store.estimate(&peer);
            shared.subscribers.fan_out(peer, offset, smoothed);
        }
    }

    async fn pump(&self) {
        loop {
            // Register interest in the stop signal *before* checking
            // `stopped`: `notify_waiters` only wakes tasks already waiting
            // on a `Notified`, so checking the flag first and building the
            // `Notified` future second would leave a window where a stop
            // landing in between is missed entirely, parking `recv_from`
            // forever on an idle socket.
            let stopped = self.stop_notify.notified();

            if self.stopped.load(Ordering::SeqCst) {
                return;
            }

            tokio::select! {
                result = self.socket.recv_from() => {
                    match result {
                        Ok((bytes, peer)) => self.handle_datagram(bytes, peer).await,
                        Err(error) => debug!(?error, "udp receive failed"),
                    }
                }
                () = stopped => return,
            }
        }
    }

    /// Drive the receive loop until [`Reactor::stop`]/[`Reactor::shutdown`]
    /// is called.
    pub(crate) async fn run(&self) {
        self.drive(None).await;
    }

    /// Drive the receive loop for at most `duration`.
    pub(crate) async fn run_for(&self, duration: Duration) {
        self.drive(Some(duration)).await;
    }

    /// Only one caller actually pumps the socket at a time; concurrent
    /// callers just wait for the pump to stop (or their own timeout) —
    /// there's nothing for a second thread to usefully do on a
    /// single-socket reactor.
    async fn drive(&self, timeout: Option<Duration>) {
        // Registered before the compare-exchange below, for the same reason
        // `pump` registers before checking `stopped`: if this loses the
        // compare-exchange race, the winning caller is still driving and is
        // guaranteed to call `notify_waiters` strictly after this point, so
        // a waiter already registered can't miss it.
        let stopped = self.stop_notify.notified();

        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        if self
            .driving
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            match timeout {
                Some(duration) => {
                    let _ = tokio::time::timeout(duration, self.pump()).await;
                }
                None => self.pump().await,
            }
            self.driving.store(false, Ordering::SeqCst);
            self.stop_notify.notify_waiters();
        } else {
            match timeout {
                Some(duration) => {
                    let _ = tokio::time::timeout(duration, stopped).await;
                }
                None => stopped.await,
            }
        }
    }

    /// Synchronous, best-effort stop: used from `Service`'s `Drop`, where
    /// there is no way to `.await` a full drain.
    pub(crate) fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    /// Stop the pump and wait for every outstanding async send to finish.
    pub(crate) async fn shutdown(&self) {
        self.stop();

        let mut tasks = std::mem::take(&mut *self.send_tasks.lock().unwrap());
        while let Some(result) = tasks.join_next().await {
            if let Err(error) = result {
                if !error.is_cancelled() {
                    debug!(?error, "send task panicked");
                }
            }
        }
    }
}
