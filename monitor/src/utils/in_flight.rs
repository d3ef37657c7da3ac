//! Single-slot guard for periodic work.
//!
//! Each polling kind owns one [`InFlight`]. A tick calls [`InFlight::try_enter`];
//! if the previous tick of the same kind is still running the call returns
//! `None` and the tick is skipped. The slot is released when the returned
//! [`InFlightPermit`] is dropped, including on early return.

use std::sync::atomic::{AtomicBool, Ordering};

/// A per-kind "already running" flag.
#[derive(Debug, Default)]
pub struct InFlight {
    busy: AtomicBool,
}

impl InFlight {
    /// Creates an idle guard.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the slot, or returns `None` when it is already held.
    #[must_use]
    pub fn try_enter(&self) -> Option<InFlightPermit<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightPermit { flag: &self.busy })
    }

    /// Returns `true` while a permit is outstanding.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases its [`InFlight`] slot on drop.
#[derive(Debug)]
pub struct InFlightPermit<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightPermit<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
