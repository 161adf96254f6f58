//! Round-robin selection over the routable instances.
//!
//! The registry changes under the balancer (placements, migrations, stops),
//! so it never remembers instances, only a monotonically increasing ticket.
//! Each pick takes the ticket modulo the size of the snapshot it is handed.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    ticket: AtomicUsize,
}

impl RoundRobinBalancer {
    /// Create a balancer starting at the first candidate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Next element of `candidates`, or `None` when there are none.
    ///
    /// Callers should pass candidates in a stable order (the router sorts by
    /// instance id) so that consecutive picks rotate instead of repeating.
    pub fn pick<'a, T>(&self, candidates: &'a [T]) -> Option<&'a T> {
        if candidates.is_empty() {
            return None;
        }
        let ticket = self.ticket.fetch_add(1, Ordering::Relaxed);
        candidates.get(ticket % candidates.len())
    }

    /// Reset the ticket counter to zero.
    pub fn reset(&self) {
        self.ticket.store(0, Ordering::Relaxed);
    }

    /// Number of picks handed out so far.
    pub fn issued(&self) -> usize {
        self.ticket.load(Ordering::Relaxed)
    }
}
