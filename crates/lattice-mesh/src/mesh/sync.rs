//! Historical back-fill ownership.
//!
//! When several peers reconnect after downtime they would all re-fetch the
//! same gap. This cell elects exactly one of them as the back-fill source;
//! the rest subscribe forward-only until ownership frees up again.

use parking_lot::Mutex;

/// Tracks which peer, if any, currently holds back-fill responsibility.
#[derive(Debug, Default)]
pub struct HistoricalSync {
    owner: Mutex<Option<String>>,
}

impl HistoricalSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim back-fill responsibility for `address`.
    ///
    /// Succeeds only when no peer holds ownership and this is not a
    /// first-time connection: first-timers request a bounded recent window
    /// and have no baseline to fill from.
    pub fn try_claim(&self, address: &str, is_first_connection: bool) -> bool {
        if is_first_connection {
            return false;
        }
        let mut owner = self.owner.lock();
        if owner.is_none() {
            *owner = Some(address.to_string());
            true
        } else {
            false
        }
    }

    /// Release ownership if `address` holds it.
    ///
    /// A release from a non-owner is a no-op, so a stale worker cannot
    /// clobber a claim made by a different peer afterwards.
    pub fn release(&self, address: &str) {
        let mut owner = self.owner.lock();
        if owner.as_deref() == Some(address) {
            *owner = None;
        }
    }

    /// The current owner's address, if any.
    pub fn owner(&self) -> Option<String> {
        self.owner.lock().clone()
    }
}
