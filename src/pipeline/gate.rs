//! Single-flight admission gate.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crossbeam::utils::CachePadded;

/// Lets at most one frame be in flight at a time. Extra arrivals are
/// refused immediately, never queued or waited on.
#[derive(Default)]
pub struct SingleFlightGate {
    in_flight: CachePadded<AtomicBool>,
    stats: CachePadded<GateStats>,
}

#[derive(Default)]
struct GateStats {
    admitted: AtomicU64,
    refused: AtomicU64,
}

impl SingleFlightGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the in-flight slot. On `true` the caller owns it and must
    /// call [`exit`](Self::exit); on `false` it must drop its frame.
    pub fn try_enter(&self) -> bool {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            self.stats.refused.fetch_add(1, Ordering::Relaxed);
            false
        } else {
            self.stats.admitted.fetch_add(1, Ordering::Relaxed);
            true
        }
    }

    /// Release the in-flight slot taken by a successful `try_enter`.
    pub fn exit(&self) {
        self.in_flight.store(false, Ordering::Release);
    }

    /// Like [`try_enter`](Self::try_enter), but the slot is released when
    /// the returned guard drops, including during unwinding.
    pub fn enter(&self) -> Option<InFlight<'_>> {
        self.try_enter().then_some(InFlight { gate: self })
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Force the gate open for session teardown. Callers must stop
    /// honouring admissions first, since a frame still in flight keeps
    /// running after the reset.
    pub fn reset(&self) {
        self.exit();
    }

    /// (admitted, refused)
    pub fn stats(&self) -> (u64, u64) {
        (
            self.stats.admitted.load(Ordering::Relaxed),
            self.stats.refused.load(Ordering::Relaxed),
        )
    }
}

/// Proof of admission; exits the gate on drop.
#[must_use = "dropping the guard immediately re-opens the gate"]
pub struct InFlight<'a> {
    gate: &'a SingleFlightGate,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.gate.exit();
    }
}
