//! Time-windowed duplicate suppression for vendor pushes.
//!
//! Two 256-bit-hash sets rotate every `filter_lifetime`: `decay <- active; active <- {}`. An
//! element is "seen" if present in either set, giving a true retention window of
//! `[filter_lifetime, 2*filter_lifetime]`. Not persisted: a short burst of duplicates after a
//! restart is an accepted tradeoff.

use std::collections::HashSet;

pub struct DedupFilter {
    active: HashSet<[u8; 32]>,
    decay: HashSet<[u8; 32]>,
    filter_lifetime_secs: i64,
    last_rotation: i64,
}

impl DedupFilter {
    pub fn new(filter_lifetime_secs: i64, now: i64) -> Self {
        Self {
            active: HashSet::new(),
            decay: HashSet::new(),
            filter_lifetime_secs,
            last_rotation: now,
        }
    }

    /// Rotates the active set into decay if a full `filter_lifetime` has elapsed since the
    /// last rotation. Callers should invoke this before `check_and_insert` on each use, e.g.
    /// from a periodic tick or on every incoming notification.
    pub fn maybe_rotate(&mut self, now: i64) {
        if now - self.last_rotation >= self.filter_lifetime_secs {
            self.decay = std::mem::take(&mut self.active);
            self.last_rotation = now;
        }
    }

    /// Returns `true` if `value` was already seen (present in either set); otherwise inserts
    /// it into `active` and returns `false`.
    pub fn check_and_insert(&mut self, value: [u8; 32], now: i64) -> bool {
        self.maybe_rotate(now);
        if self.active.contains(&value) || self.decay.contains(&value) {
            return true;
        }
        self.active.insert(value);
        false
    }

    pub fn contains(&self, value: &[u8; 32]) -> bool {
        self.active.contains(value) || self.decay.contains(value)
    }
}

/// `filter_val = BLAKE2b-256(service || service_id || msg_hash)`.
pub fn filter_value(service: &str, service_id: &str, msg_hash: &[u8]) -> [u8; 32] {
    let mut data = Vec::with_capacity(service.len() + service_id.len() + msg_hash.len());
    data.extend_from_slice(service.as_bytes());
    data.extend_from_slice(service_id.as_bytes());
    data.extend_from_slice(msg_hash);
    hivemind_crypto::blake2b_256(&data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seen_within_first_window_then_unseen_after_two_windows() {
        let mut filter = DedupFilter::new(100, 0);
        let val = [1u8; 32];
        assert!(!filter.check_and_insert(val, 0));
        assert!(filter.check_and_insert(val, 50));
        // still within [0, 200): decayed into `decay` at t=100, still reported seen
        assert!(filter.contains(&val));
        filter.maybe_rotate(100);
        assert!(filter.contains(&val)); // now in decay
        filter.maybe_rotate(200); // second rotation drops it
        assert!(!filter.contains(&val));
    }

    #[test]
    fn distinct_values_do_not_collide() {
        let mut filter = DedupFilter::new(100, 0);
        assert!(!filter.check_and_insert([1u8; 32], 0));
        assert!(!filter.check_and_insert([2u8; 32], 0));
        assert!(filter.check_and_insert([1u8; 32], 0));
    }

    #[test]
    fn filter_value_changes_with_any_input() {
        let a = filter_value("apns", "device1", b"hash");
        let b = filter_value("apns", "device2", b"hash");
        assert_ne!(a, b);
    }
}
