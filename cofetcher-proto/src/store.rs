//! Per-peer bounded offset history and the 2σ-trimmed-mean estimator.
//!
//! This module is plain data manipulation with no locking of its own; the
//! daemon crate wraps a single [`OffsetStore`] in a mutex and is responsible
//! for all concurrency guarantees described in the wider design.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

/// A peer endpoint, keyed by its UDP address.
pub type PeerAddr = SocketAddr;

/// Bounded per-peer offset history, oldest-evicted-first.
#[derive(Debug, Default)]
pub struct OffsetStore {
    histories: HashMap<PeerAddr, VecDeque<i32>>,
    offset_counts: usize,
}

impl OffsetStore {
    /// Create a store that keeps at most `offset_counts` offsets per peer.
    pub fn new(offset_counts: u16) -> OffsetStore {
        OffsetStore {
            histories: HashMap::new(),
            offset_counts: offset_counts.max(1) as usize,
        }
    }

    /// Push a freshly derived offset onto `peer`'s history, evicting the
    /// oldest entry while the history exceeds `offset_counts`.
    pub fn append(&mut self, peer: PeerAddr, offset: i32) {
        let history = self.histories.entry(peer).or_default();
        history.push_back(offset);
        while history.len() > self.offset_counts {
            history.pop_front();
        }
    }

    /// The 2σ-trimmed-mean estimate for `peer`, or 0 if the peer has no
    /// recorded history.
    pub fn estimate(&self, peer: &PeerAddr) -> i32 {
        match self.histories.get(peer) {
            Some(history) => trimmed_mean(history),
            None => 0,
        }
    }

    /// Estimate for every known peer, each internally consistent with
    /// itself (no tearing within one peer's own history).
    pub fn snapshot(&self) -> HashMap<PeerAddr, i32> {
        self.histories
            .keys()
            .map(|peer| (*peer, self.estimate(peer)))
            .collect()
    }
}

/// The 2σ-trimmed mean of `history`, using the second raw moment
/// (`Σ o²/n`), not the central second moment, as the variance proxy.
///
/// This is a deliberate choice of statistic, not standard variance — see
/// `DESIGN.md` for why the second raw moment is kept instead of the
/// central moment.
fn trimmed_mean(history: &VecDeque<i32>) -> i32 {
    let n = history.len();
    if n == 0 {
        return 0;
    }

    let n_f = n as f64;
    let mean = history.iter().map(|&o| f64::from(o) / n_f).sum::<f64>();
    let second_moment = history
        .iter()
        .map(|&o| f64::from(o) * f64::from(o) / n_f)
        .sum::<f64>();
    let sigma = second_moment.sqrt();

    let mut corrected = mean;
    for &o in history {
        if (f64::from(o) - mean).abs() > 2.0 * sigma {
            corrected -= f64::from(o) / n_f;
        }
    }

    corrected as i32
}
