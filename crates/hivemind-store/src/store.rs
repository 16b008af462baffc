//! The authoritative `{account -> subscriptions}` index, backed by a
//! [`SubscriptionPersistence`] implementation.
//!
//! This struct performs no locking of its own: it is designed to live inside a single owning
//! coordinator's mutex, so every method here takes `&mut self`.

use std::collections::HashMap;
use std::sync::Arc;

use hivemind_core::{Account, Subscription, SubscriptionKey};

use crate::error::Result;
use crate::persistence::{PersistedSubscription, SubscriptionPersistence};

/// Result of [`SubscriptionStore::add_subscription`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddOutcome {
    pub replaced_existing: bool,
    /// Whether Hive must be told to (re)assert this account's subscriptions with its swarm
    /// (false when an existing subscription for the account already covers the new one, per
    /// the covering/idempotence rule).
    pub needs_fanout: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotPresent,
}

pub struct SubscriptionStore {
    persistence: Arc<dyn SubscriptionPersistence>,
    accounts: HashMap<[u8; 33], Account>,
    by_account: HashMap<[u8; 33], Vec<Subscription>>,
}

impl SubscriptionStore {
    pub fn new(persistence: Arc<dyn SubscriptionPersistence>) -> Self {
        Self { persistence, accounts: HashMap::new(), by_account: HashMap::new() }
    }

    /// Restores every non-expired subscription at startup.
    pub async fn load_all(&mut self, now: i64, expiry_secs: i64) -> Result<()> {
        let rows = self.persistence.load_all(now, expiry_secs).await?;
        for row in rows {
            let account_id = row.account;
            let ed25519_pubkey = row.session_ed25519;
            self.accounts
                .entry(account_id)
                .or_insert_with(|| reconstruct_account(account_id, ed25519_pubkey));
            let sub = row.into_subscription();
            self.by_account.entry(account_id).or_default().push(sub);
        }
        Ok(())
    }

    pub fn account(&self, account_id: &[u8; 33]) -> Option<&Account> {
        self.accounts.get(account_id)
    }

    /// Accounts currently tracked by the store, for `SwarmTopology::update_swarm` sweeps.
    pub fn accounts_mut(&mut self) -> impl Iterator<Item = &mut Account> {
        self.accounts.values_mut()
    }

    pub fn subscriptions_for(&self, account_id: &[u8; 33]) -> &[Subscription] {
        self.by_account.get(account_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Validated subscriptions (not expired at `now`) for an account, as consumed by Hive's
    /// `check_subs` batching.
    pub fn valid_subscriptions_for(&self, account_id: &[u8; 33], now: i64) -> Vec<&Subscription> {
        self.subscriptions_for(account_id).iter().filter(|s| !s.is_expired(now)).collect()
    }

    /// Inserts or replaces `sub` under its `(account, service, svcid)` key, persisting the
    /// change and determining whether Hive fan-out is required.
    pub async fn add_subscription(&mut self, account: Account, sub: Subscription) -> Result<AddOutcome> {
        let account_id = *account.id();
        let ed25519_pubkey = *account.ed25519_pubkey();
        self.accounts.entry(account_id).or_insert(account);

        let entries = self.by_account.entry(account_id).or_default();
        let key: SubscriptionKey = sub.key();
        let existing_idx = entries.iter().position(|s| s.key() == key);

        // A replayed subscription older than what's already stored must not regress the
        // stored sig_ts (and thus its effective expiry): keep the newer one and report the
        // request as an idempotent no-op against the existing record.
        if let Some(idx) = existing_idx {
            if !sub.is_newer_than(&entries[idx]) {
                return Ok(AddOutcome { replaced_existing: true, needs_fanout: false });
            }
        }

        let needs_fanout = !entries
            .iter()
            .enumerate()
            .any(|(i, s)| Some(i) != existing_idx && s.covers(&sub));

        let row = PersistedSubscription::from_subscription(&sub, ed25519_pubkey);
        self.persistence.upsert(&row).await?;

        let replaced_existing = existing_idx.is_some();
        if let Some(idx) = existing_idx {
            entries[idx] = sub;
        } else {
            entries.push(sub);
        }

        Ok(AddOutcome { replaced_existing, needs_fanout })
    }

    /// Removes the subscription identified by `(account_id, service, service_id)`.
    pub async fn remove_subscription(
        &mut self,
        account_id: &[u8; 33],
        service: &str,
        service_id: &str,
    ) -> Result<RemoveOutcome> {
        let removed_from_db = self.persistence.delete(account_id, service, service_id).await?;
        let mut removed_from_memory = false;
        if let Some(entries) = self.by_account.get_mut(account_id) {
            let before = entries.len();
            entries.retain(|s| s.service != service || s.service_id != service_id);
            removed_from_memory = entries.len() != before;
        }
        Ok(if removed_from_db || removed_from_memory {
            RemoveOutcome::Removed
        } else {
            RemoveOutcome::NotPresent
        })
    }

    /// Removes every subscription whose `sig_ts + 14 days < now`, from memory and persistence.
    pub async fn expire_old(&mut self, now: i64, expiry_secs: i64) -> Result<u64> {
        let removed = self.persistence.delete_expired(now, expiry_secs).await?;
        for entries in self.by_account.values_mut() {
            entries.retain(|s| !s.is_expired(now));
        }
        self.by_account.retain(|_, v| !v.is_empty());
        Ok(removed)
    }
}

fn reconstruct_account(account_id: [u8; 33], ed25519_pubkey: [u8; 32]) -> Account {
    Account::new(account_id, Some(ed25519_pubkey))
        .or_else(|_| Account::new(account_id, None))
        .expect("persisted account id/ed25519 pair was valid when stored")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ed25519_dalek::{Signer, SigningKey};
    use hivemind_crypto::monitor_sig_message;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakePersistence {
        rows: Mutex<Vec<PersistedSubscription>>,
    }

    #[async_trait]
    impl SubscriptionPersistence for FakePersistence {
        async fn upsert(&self, row: &PersistedSubscription) -> Result<()> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(existing) = rows
                .iter_mut()
                .find(|r| r.account == row.account && r.service == row.service && r.service_id == row.service_id)
            {
                *existing = row.clone();
            } else {
                rows.push(row.clone());
            }
            Ok(())
        }

        async fn delete(&self, account: &[u8; 33], service: &str, service_id: &str) -> Result<bool> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|r| !(r.account == *account && r.service == service && r.service_id == service_id));
            Ok(rows.len() != before)
        }

        async fn load_all(&self, _now: i64, _expiry_secs: i64) -> Result<Vec<PersistedSubscription>> {
            Ok(self.rows.lock().unwrap().clone())
        }

        async fn delete_expired(&self, now: i64, expiry_secs: i64) -> Result<u64> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|r| r.signature_ts - now >= -expiry_secs);
            Ok((before - rows.len()) as u64)
        }
    }

    fn make_account() -> (Account, SigningKey) {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let ed = *signing_key.verifying_key().as_bytes();
        let x25519 = hivemind_crypto::ed25519_pubkey_to_x25519(&ed).unwrap();
        let mut id = [0u8; 33];
        id[0] = 0x05;
        id[1..].copy_from_slice(&x25519);
        (Account::new(id, Some(ed)).unwrap(), signing_key)
    }

    fn make_sub(account: &Account, key: &SigningKey, namespaces: Vec<i16>, want_data: bool, sig_ts: i64) -> Subscription {
        let msg = monitor_sig_message(account.id(), sig_ts, want_data, &namespaces);
        let sig = key.sign(&msg).to_bytes();
        Subscription::new(
            account, None, namespaces, want_data, sig_ts, sig, [1u8; 32],
            "apns".into(), "a".repeat(40), vec![], sig_ts,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn add_then_replace_reports_added_then_updated() {
        let persistence = Arc::new(FakePersistence::default());
        let mut store = SubscriptionStore::new(persistence);
        let (account, key) = make_account();

        let sub1 = make_sub(&account, &key, vec![0, 1], false, 1000);
        let outcome1 = store.add_subscription(account.clone(), sub1).await.unwrap();
        assert!(!outcome1.replaced_existing);
        assert!(outcome1.needs_fanout);

        let sub2 = make_sub(&account, &key, vec![0, 1, 2], false, 1001);
        let outcome2 = store.add_subscription(account.clone(), sub2).await.unwrap();
        assert!(outcome2.replaced_existing);
        assert!(outcome2.needs_fanout); // grew the namespace set, so fan-out is still needed

        assert_eq!(store.subscriptions_for(account.id()).len(), 1);
    }

    #[tokio::test]
    async fn covered_subscription_skips_fanout() {
        let persistence = Arc::new(FakePersistence::default());
        let mut store = SubscriptionStore::new(persistence);
        let (account, key) = make_account();

        let broad = make_sub(&account, &key, vec![0, 1, 2, 3], true, 1000);
        store.add_subscription(account.clone(), broad).await.unwrap();

        // A second device subscribing to a subset of namespaces is already covered.
        let mut narrow_sub = make_sub(&account, &key, vec![1, 2], false, 1001);
        narrow_sub.service_id = "b".repeat(40);
        let outcome = store.add_subscription(account.clone(), narrow_sub).await.unwrap();
        assert!(!outcome.replaced_existing);
        assert!(!outcome.needs_fanout);
    }

    #[tokio::test]
    async fn replaying_an_older_signature_does_not_regress_the_stored_one() {
        let persistence = Arc::new(FakePersistence::default());
        let mut store = SubscriptionStore::new(persistence);
        let (account, key) = make_account();

        let newer = make_sub(&account, &key, vec![0, 1, 2], false, 2000);
        store.add_subscription(account.clone(), newer).await.unwrap();

        let stale = make_sub(&account, &key, vec![0], false, 1000);
        let outcome = store.add_subscription(account.clone(), stale).await.unwrap();
        assert!(outcome.replaced_existing);
        assert!(!outcome.needs_fanout);

        let stored = store.subscriptions_for(account.id());
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sig_ts, 2000);
        assert_eq!(stored[0].namespaces, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn remove_subscription_reports_not_present_when_missing() {
        let persistence = Arc::new(FakePersistence::default());
        let mut store = SubscriptionStore::new(persistence);
        let (account, _key) = make_account();
        let outcome = store
            .remove_subscription(account.id(), "apns", &"a".repeat(40))
            .await
            .unwrap();
        assert_eq!(outcome, RemoveOutcome::NotPresent);
    }

    #[tokio::test]
    async fn expire_old_drops_stale_rows() {
        let persistence = Arc::new(FakePersistence::default());
        let mut store = SubscriptionStore::new(persistence);
        let (account, key) = make_account();
        let sub = make_sub(&account, &key, vec![0], false, 1000);
        store.add_subscription(account.clone(), sub).await.unwrap();

        let removed = store.expire_old(1000 + 14 * 86_400 + 1, 14 * 86_400).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.subscriptions_for(account.id()).is_empty());
    }
}
