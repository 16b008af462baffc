//! Core data model for the SPNS hivemind: accounts, swarms, service nodes, and subscriptions.
//!
//! This crate holds the pure domain types and validation rules shared by the networking,
//! storage, and notification layers, with no I/O of its own.

pub mod account;
pub mod error;
pub mod subscription;
pub mod swarm;
pub mod time;

pub use account::{closest_swarm, swarm_space_of, Account, SESSION_ID_PREFIX};
pub use error::{CoreError, Result, SubscribeCode};
pub use subscription::{
    verify_unsubscribe, Subscription, SubscriptionKey, SIGNATURE_EXPIRY_SECS, SIG_TS_FUTURE_GRACE_SECS,
    UNSUBSCRIBE_GRACE_SECS,
};
pub use swarm::{ServiceNode, Swarm, NO_SWARM};
pub use time::now_unix;

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn account_with_space(space: u64) -> Account {
        let mut id = [0x03u8; 33];
        id[1..9].copy_from_slice(&space.to_be_bytes());
        for b in &mut id[9..33] {
            *b = 0;
        }
        Account::new(id, None).unwrap()
    }

    fn wrapping_distance(a: u64, b: u64) -> u64 {
        a.wrapping_sub(b).min(b.wrapping_sub(a))
    }

    proptest! {
        // Invariant 1: update_swarm always selects a ring-minimal candidate.
        #[test]
        fn ring_placement_is_distance_minimal(
            mut swarm_ids in prop::collection::btree_set(any::<u64>(), 1..16),
            space in any::<u64>(),
        ) {
            let ids: Vec<u64> = swarm_ids.drain().collect();
            let chosen = closest_swarm(&ids, space);
            let chosen_dist = wrapping_distance(chosen, space);
            for &candidate in &ids {
                let d = wrapping_distance(candidate, space);
                prop_assert!(d >= chosen_dist || (d == chosen_dist && candidate >= chosen));
            }
        }

        // Invariant 2: swarm_space is a pure function of id bytes, independent of any
        // subsequent serialization round-trip (here: re-deriving from an Account built from
        // the same id bytes must match).
        #[test]
        fn swarm_space_is_stable_across_reconstruction(space in any::<u64>()) {
            let a1 = account_with_space(space);
            let a2 = account_with_space(space);
            prop_assert_eq!(a1.swarm_space(), a2.swarm_space());
            prop_assert_eq!(a1.swarm_space(), space);
        }

        // Invariant 6: sig_ts acceptance window boundaries.
        #[test]
        fn sig_ts_window_boundaries_hold(now in 1_000_000_000i64..2_000_000_000i64, delta in -2_000_000i64..2_000_000i64) {
            let sig_ts = now + delta;
            let age = now - sig_ts;
            let accept = age < subscription::SIGNATURE_EXPIRY_SECS
                && sig_ts < now + subscription::SIG_TS_FUTURE_GRACE_SECS;

            let result = if sig_ts <= now - subscription::SIGNATURE_EXPIRY_SECS {
                false
            } else if sig_ts >= now + subscription::SIG_TS_FUTURE_GRACE_SECS {
                false
            } else {
                true
            };
            prop_assert_eq!(result, accept);
        }
    }
}
