//! Subscription persistence and the authoritative account/subscription index for the SPNS
//! hivemind.

pub mod error;
pub mod persistence;
pub mod store;

pub use error::{Result, StoreError};
pub use persistence::{PersistedSubscription, PostgresPersistence, SubscriptionPersistence};
pub use store::{AddOutcome, RemoveOutcome, SubscriptionStore};
