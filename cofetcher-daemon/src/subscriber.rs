//! Ordered subscriber list with stable handles and self-removal.

use cofetcher_proto::PeerAddr;

use crate::slotmap::{Key, SlotMap};

/// The signature every subscriber callback must implement.
///
/// `drop_me` starts `false` on every invocation; a callback sets it to
/// `true` to request its own removal once the current fan-out completes.
/// Calling [`Subscribers::unsubscribe`] from *inside* a callback would
/// deadlock against the fan-out lock — use `drop_me` instead.
pub trait Subscriber: FnMut(PeerAddr, i32, i32, &mut bool) + Send {}
impl<F> Subscriber for F where F: FnMut(PeerAddr, i32, i32, &mut bool) + Send {}

/// An opaque, stable handle to a subscription. Never reused within the
/// lifetime of the registry that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Key);

/// Ordered registry of subscriber callbacks.
///
/// This type does no locking of its own; `cofetcher-daemon`'s reactor holds
/// it behind the same mutex as the offset store so a fan-out always
/// observes a `smoothed_offset` consistent with the append that triggered
/// it (see the crate's design notes on joint locking).
#[derive(Default)]
pub struct Subscribers {
    slots: SlotMap<Box<dyn Subscriber>>,
    order: Vec<Key>,
}

impl Subscribers {
    pub fn new() -> Subscribers {
        Subscribers {
            slots: SlotMap::new(),
            order: Vec::new(),
        }
    }

    /// Insert `callback` at the tail of the subscriber list.
    pub fn subscribe(&mut self, callback: impl Subscriber + 'static) -> SubscriberId {
        let key = self.slots.insert(Box::new(callback));
        self.order.push(key);
        SubscriberId(key)
    }

    /// Remove a subscription. Unknown or already-removed ids are a no-op.
    pub fn unsubscribe(&mut self, id: SubscriberId) {
        if self.slots.remove(id.0).is_some() {
            self.order.retain(|&key| key != id.0);
        }
    }

    /// Number of currently active subscriptions.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.len() == 0
    }

    /// Invoke every live subscriber, in subscription order, with the given
    /// `(peer, raw_offset, smoothed_offset)`. Subscribers that set
    /// `drop_me = true` are removed once every callback for this fan-out
    /// has run.
    pub fn fan_out(&mut self, peer: PeerAddr, raw_offset: i32, smoothed_offset: i32) {
        // Clone the small, `Copy`-key order list so the loop below can hold
        // a mutable borrow of `self.slots` without also borrowing `self.order`.
        let order = self.order.clone();
        let mut to_drop = Vec::new();

        for key in order {
            if let Some(callback) = self.slots.get_mut(key) {
                let mut drop_me = false;
                callback(peer, raw_offset, smoothed_offset, &mut drop_me);
                if drop_me {
                    to_drop.push(key);
                }
            }
        }

        for key in to_drop {
            self.slots.remove(key);
            self.order.retain(|&k| k != key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn peer() -> PeerAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn fan_out_runs_in_subscription_order() {
        let mut subscribers = Subscribers::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..3 {
            let order = order.clone();
            subscribers.subscribe(move |_peer, _raw, _smoothed, _drop_me| {
                order.lock().unwrap().push(tag);
            });
        }

        subscribers.fan_out(peer(), 10, 8);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn drop_me_removes_after_fan_out_completes() {
        let mut subscribers = Subscribers::new();
        let calls = Arc::new(Mutex::new(0));
        let calls_inner = calls.clone();

        subscribers.subscribe(move |_peer, _raw, _smoothed, drop_me| {
            *calls_inner.lock().unwrap() += 1;
            *drop_me = true;
        });

        assert_eq!(subscribers.len(), 1);
        subscribers.fan_out(peer(), 0, 0);
        assert_eq!(subscribers.len(), 0);

        subscribers.fan_out(peer(), 0, 0);
        assert_eq!(*calls.lock().unwrap(), 1, "removed subscriber is not invoked again");
    }

    #[test]
    fn unsubscribe_unknown_id_is_a_no_op() {
        let mut subscribers = Subscribers::new();
        let id = subscribers.subscribe(|_, _, _, _| {});
        subscribers.unsubscribe(id);
        assert_eq!(subscribers.len(), 0);
        subscribers.unsubscribe(id); // already gone
        assert_eq!(subscribers.len(), 0);
    }
}
