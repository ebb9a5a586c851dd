//! Repeating, jittered per-peer probe timers with stable handles.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::slotmap::{Key, SlotMap};

/// An opaque, stable handle to one repeating probe. Inert, but not
/// undefined, once its timer has been cancelled: queries on it report
/// "not present" rather than panicking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(Key);

/// The set of currently active repeating probes.
///
/// Guarded by its own lock (`timers_lock` in the wider design), independent
/// from the offset store / subscriber lock.
pub struct Timers {
    active: Mutex<SlotMap<Arc<Notify>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    rng: Mutex<StdRng>,
    max_repetition_interval: u16,
}

impl Timers {
    pub fn new(max_repetition_interval: u16) -> Arc<Timers> {
        Arc::new(Timers {
            active: Mutex::new(SlotMap::new()),
            handles: Mutex::new(Vec::new()),
            rng: Mutex::new(StdRng::from_entropy()),
            max_repetition_interval,
        })
    }

    /// Install a new repeating probe. `fire` runs immediately, then again
    /// after each jittered interval until [`Timers::cancel_iterative`] is
    /// called with the returned id.
    ///
    /// The fire handler looks up its own id under the timer lock before
    /// acting on each subsequent wakeup; if the id is no longer present
    /// (cancelled between scheduling and firing) it returns without
    /// rescheduling, avoiding acting on a timer that is mid-cancellation.
    pub fn init_iterative<F>(self: &Arc<Self>, fire: F) -> TimerId
    where
        F: Fn() + Send + 'static,
    {
        let notify = Arc::new(Notify::new());
        let key = self.active.lock().unwrap().insert(notify.clone());
        let id = TimerId(key);

        let registry = Arc::clone(self);
        let handle = tokio::spawn(async move {
            // First fire is immediate: the caller just created this slot,
            // so there is no cancellation race to check against yet.
            fire();
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(registry.jitter()) => {}
                    _ = notify.notified() => return,
                }

                if !registry.active.lock().unwrap().contains(key) {
                    return;
                }
                fire();
            }
        });
        self.handles.lock().unwrap().push(handle);

        id
    }

    /// Cancel a repeating probe. Unknown or already-cancelled ids are a
    /// no-op. A fire already in progress when this is called completes;
    /// no further fire of `id` is observed after this returns.
    pub fn cancel_iterative(&self, id: TimerId) {
        if let Some(notify) = self.active.lock().unwrap().remove(id.0) {
            notify.notify_one();
        }
    }

    /// Number of currently active repeating probes.
    pub fn count(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    /// Cancel every active timer without waiting for its task to actually
    /// stop. Synchronous so it can run from a plain (non-async) `Drop`;
    /// each spawned task holds its own `Arc<Timers>` clone, so cancelling
    /// only the slot (not joining the task) is what keeps this callable
    /// outside an async context.
    pub(crate) fn cancel_all(&self) {
        let notifies: Vec<_> = {
            let mut active = self.active.lock().unwrap();
            let keys: Vec<Key> = active.keys().collect();
            keys.into_iter()
                .filter_map(|key| active.remove(key))
                .collect()
        };
        for notify in notifies {
            notify.notify_one();
        }
    }

    /// Cancel every active timer and wait for every spawned task (active or
    /// already-finished) to actually stop, draining the handle list.
    pub async fn shutdown(&self) {
        self.cancel_all();

        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Uniform integer draw from `U[max(1, R-6), max(1, R)]` seconds, where
    /// `R` is `max_repetition_interval`.
    ///
    /// A naively mirrored lower/upper bound of `U[max(1, R-6), min(1, R)]`
    /// collapses to the constant `U[1, 1]` for any `R >= 1`; see
    /// `DESIGN.md` for why this uses `max` for both bounds instead.
    fn jitter(&self) -> Duration {
        let r = i64::from(self.max_repetition_interval);
        let lo = (r - 6).max(1);
        let hi = r.max(1);
        let secs = self.rng.lock().unwrap().gen_range(lo..=hi);
        Duration::from_secs(secs as u64)
    }
}
