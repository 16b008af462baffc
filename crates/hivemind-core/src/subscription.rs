//! The per-device notification subscription and its validation rules.

use crate::account::Account;
use crate::error::{CoreError, Result};
use hivemind_crypto::{monitor_sig_message, unsubscribe_sig_message, verify_storage_signature};
use serde::{Deserialize, Serialize};

/// How long a subscription remains valid after its signature timestamp.
pub const SIGNATURE_EXPIRY_SECS: i64 = 14 * 86_400;

/// How far into the future a subscribe `sig_ts` may be.
pub const SIG_TS_FUTURE_GRACE_SECS: i64 = 86_400;

/// How far a stale unsubscribe `sig_ts` may drift from "now" in either direction.
pub const UNSUBSCRIBE_GRACE_SECS: i64 = 86_400;

/// Minimum accepted `service_id` length, matching the notifier bus's own `svc_id` floor
/// (`hivemind_notify::bus::MIN_SVC_ID_LEN`).
const MIN_SERVICE_ID_LEN: usize = 32;

/// One device's wish to receive notifications for one account.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Subscription {
    pub account_id: [u8; 33],
    pub subkey_tag: Option<[u8; 32]>,
    pub namespaces: Vec<i16>,
    pub want_data: bool,
    pub sig_ts: i64,
    pub signature: [u8; 64],
    pub enc_key: [u8; 32],
    pub service: String,
    pub service_id: String,
    pub service_data: Vec<u8>,
}

/// Identifies a subscription: `(account.id, service, service_id)` is unique; a new subscription with the same key replaces any previous one.
pub type SubscriptionKey = ([u8; 33], String, String);

impl Subscription {
    /// Validates and constructs a new subscribe-side Subscription, verifying the signature
    /// against `account`'s key material (with or without subkey delegation).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account: &Account,
        subkey_tag: Option<[u8; 32]>,
        namespaces: Vec<i16>,
        want_data: bool,
        sig_ts: i64,
        signature: [u8; 64],
        enc_key: [u8; 32],
        service: String,
        service_id: String,
        service_data: Vec<u8>,
        now: i64,
    ) -> Result<Self> {
        validate_subscribe(account, subkey_tag.as_ref(), &namespaces, want_data, sig_ts, &signature, now)?;

        if service.is_empty() {
            return Err(CoreError::EmptyServiceName);
        }
        if service_id.len() < MIN_SERVICE_ID_LEN {
            return Err(CoreError::ServiceIdTooShort(service_id.len()));
        }

        Ok(Self {
            account_id: *account.id(),
            subkey_tag,
            namespaces,
            want_data,
            sig_ts,
            signature,
            enc_key,
            service,
            service_id,
            service_data,
        })
    }

    /// Reconstructs a Subscription from already-validated persisted fields, skipping
    /// signature verification (used by `SubscriptionStore::load_all`).
    #[allow(clippy::too_many_arguments)]
    pub fn from_trusted_parts(
        account_id: [u8; 33],
        subkey_tag: Option<[u8; 32]>,
        namespaces: Vec<i16>,
        want_data: bool,
        sig_ts: i64,
        signature: [u8; 64],
        enc_key: [u8; 32],
        service: String,
        service_id: String,
        service_data: Vec<u8>,
    ) -> Self {
        Self {
            account_id,
            subkey_tag,
            namespaces,
            want_data,
            sig_ts,
            signature,
            enc_key,
            service,
            service_id,
            service_data,
        }
    }

    pub fn key(&self) -> SubscriptionKey {
        (self.account_id, self.service.clone(), self.service_id.clone())
    }

    /// True if `self` and `other` describe the same subscription effectively (account,
    /// subkey, namespaces, want_data, enc_key) -- i.e. ignores signature/timestamp.
    pub fn is_same(&self, other: &Subscription) -> bool {
        self.account_id == other.account_id
            && self.subkey_tag == other.subkey_tag
            && self.namespaces == other.namespaces
            && self.want_data == other.want_data
            && self.enc_key == other.enc_key
    }

    /// True if `self` is the same as, or a strict superset of, `other`: same account/subkey
    /// auth, at least all of `other`'s namespaces, and wants data whenever `other` does.
    pub fn covers(&self, other: &Subscription) -> bool {
        if self.account_id != other.account_id || self.subkey_tag != other.subkey_tag {
            return false;
        }
        if other.want_data && !self.want_data {
            return false;
        }

        let mut i = 0usize;
        for &needed in &other.namespaces {
            while i < self.namespaces.len() && self.namespaces[i] < needed {
                i += 1;
            }
            if i >= self.namespaces.len() || self.namespaces[i] != needed {
                return false;
            }
            i += 1;
        }
        true
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.sig_ts + SIGNATURE_EXPIRY_SECS < now
    }

    pub fn is_newer_than(&self, other: &Subscription) -> bool {
        self.sig_ts >= other.sig_ts
    }
}

/// Validates an unsubscribe request's signature and sig_ts window, returning the account_id
/// it authorizes operating on.
pub fn verify_unsubscribe(
    account: &Account,
    subkey_tag: Option<&[u8; 32]>,
    sig_ts: i64,
    signature: &[u8; 64],
    now: i64,
) -> Result<()> {
    if (sig_ts - now).abs() > UNSUBSCRIBE_GRACE_SECS {
        return Err(CoreError::SigTsTooOld { sig_ts, now });
    }
    let msg = unsubscribe_sig_message(account.id(), sig_ts);
    verify_storage_signature(&msg, signature, account.ed25519_pubkey(), subkey_tag)
        .map_err(|_| CoreError::BadSignature)
}

#[allow(clippy::too_many_arguments)]
fn validate_subscribe(
    account: &Account,
    subkey_tag: Option<&[u8; 32]>,
    namespaces: &[i16],
    want_data: bool,
    sig_ts: i64,
    signature: &[u8; 64],
    now: i64,
) -> Result<()> {
    validate_namespaces(namespaces)?;
    validate_sig_ts_for_subscribe(sig_ts, now)?;

    let msg = monitor_sig_message(account.id(), sig_ts, want_data, namespaces);
    verify_storage_signature(&msg, signature, account.ed25519_pubkey(), subkey_tag)
        .map_err(|_| CoreError::BadSignature)
}

fn validate_namespaces(namespaces: &[i16]) -> Result<()> {
    if namespaces.is_empty() {
        return Err(CoreError::EmptyNamespaces);
    }
    for w in namespaces.windows(2) {
        if w[0] >= w[1] {
            return Err(CoreError::UnsortedNamespaces);
        }
    }
    // Range is enforced at decode time (`hivemind_proto::client::SubscribeRequest::decode`),
    // before a wider integer type is narrowed to i16; nothing to check here.
    Ok(())
}

fn validate_sig_ts_for_subscribe(sig_ts: i64, now: i64) -> Result<()> {
    if sig_ts <= now - SIGNATURE_EXPIRY_SECS {
        return Err(CoreError::SigTsTooOld { sig_ts, now });
    }
    if sig_ts >= now + SIG_TS_FUTURE_GRACE_SECS {
        return Err(CoreError::SigTsTooNew { sig_ts, now });
    }
    Ok(())
}
