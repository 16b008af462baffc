//! The durability contract [`SubscriptionStore`] relies on, plus its Postgres implementation.
//!
//! Kept as a trait (rather than hard-wiring `sqlx::PgPool` into the store) so unit tests can
//! exercise the store's add/covering/expiry logic against an in-memory fake without a running
//! database, matching the dynamic-dispatch registry style used for notifiers.

use async_trait::async_trait;
use hivemind_core::Subscription;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::error::Result;

/// A subscription row as stored (and loaded back from) the relational schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistedSubscription {
    pub account: [u8; 33],
    pub session_ed25519: [u8; 32],
    pub subkey_tag: Option<[u8; 32]>,
    pub signature: [u8; 64],
    pub signature_ts: i64,
    pub want_data: bool,
    pub enc_key: [u8; 32],
    pub service: String,
    pub service_id: String,
    pub service_data: Vec<u8>,
    pub namespaces: Vec<i16>,
}

impl PersistedSubscription {
    /// Builds the persisted row for `s`, given the owning account's `ed25519_pubkey` (the
    /// Subscription itself only carries the account id, not the key material that
    /// authenticated it).
    pub fn from_subscription(s: &Subscription, ed25519_pubkey: [u8; 32]) -> Self {
        Self {
            account: s.account_id,
            session_ed25519: ed25519_pubkey,
            subkey_tag: s.subkey_tag,
            signature: s.signature,
            signature_ts: s.sig_ts,
            want_data: s.want_data,
            enc_key: s.enc_key,
            service: s.service.clone(),
            service_id: s.service_id.clone(),
            service_data: s.service_data.clone(),
            namespaces: s.namespaces.clone(),
        }
    }

    pub fn into_subscription(self) -> Subscription {
        Subscription::from_trusted_parts(
            self.account,
            self.subkey_tag,
            self.namespaces,
            self.want_data,
            self.signature_ts,
            self.signature,
            self.enc_key,
            self.service,
            self.service_id,
            self.service_data,
        )
    }
}

#[async_trait]
pub trait SubscriptionPersistence: Send + Sync {
    /// Inserts or atomically replaces (by the unique `(account, service, svcid)` key) a
    /// subscription row, including its namespace rows.
    async fn upsert(&self, row: &PersistedSubscription) -> Result<()>;

    /// Deletes the row identified by `(account, service, svcid)`. Returns whether a row was
    /// actually removed.
    async fn delete(&self, account: &[u8; 33], service: &str, service_id: &str) -> Result<bool>;

    /// Loads every row with `signature_ts + 14 days >= now`.
    async fn load_all(&self, now: i64, expiry_secs: i64) -> Result<Vec<PersistedSubscription>>;

    /// Deletes every row with `signature_ts + 14 days < now`. Returns the number removed.
    async fn delete_expired(&self, now: i64, expiry_secs: i64) -> Result<u64>;
}

/// Postgres-backed persistence, per `db.url`.
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SubscriptionPersistence for PostgresPersistence {
    async fn upsert(&self, row: &PersistedSubscription) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let subkey_tag = row.subkey_tag.map(|t| t.to_vec());
        let rec = sqlx::query(
            r#"
            INSERT INTO subscriptions
                (account, session_ed25519, subkey_tag, signature, signature_ts, want_data,
                 enc_key, service, svcid, svcdata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (account, service, svcid) DO UPDATE SET
                session_ed25519 = EXCLUDED.session_ed25519,
                subkey_tag = EXCLUDED.subkey_tag,
                signature = EXCLUDED.signature,
                signature_ts = EXCLUDED.signature_ts,
                want_data = EXCLUDED.want_data,
                enc_key = EXCLUDED.enc_key,
                svcdata = EXCLUDED.svcdata
            RETURNING id
            "#,
        )
        .bind(row.account.as_slice())
        .bind(row.session_ed25519.as_slice())
        .bind(subkey_tag)
        .bind(row.signature.as_slice())
        .bind(row.signature_ts)
        .bind(row.want_data)
        .bind(row.enc_key.as_slice())
        .bind(&row.service)
        .bind(&row.service_id)
        .bind(&row.service_data)
        .fetch_one(&mut *tx)
        .await?;

        let id: i64 = rec.try_get("id")?;

        sqlx::query("DELETE FROM sub_namespaces WHERE subscription = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for &ns in &row.namespaces {
            sqlx::query("INSERT INTO sub_namespaces (subscription, namespace) VALUES ($1, $2)")
                .bind(id)
                .bind(ns)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, account: &[u8; 33], service: &str, service_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM subscriptions WHERE account = $1 AND service = $2 AND svcid = $3",
        )
        .bind(account.as_slice())
        .bind(service)
        .bind(service_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn load_all(&self, now: i64, expiry_secs: i64) -> Result<Vec<PersistedSubscription>> {
        let cutoff = now - expiry_secs;
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.account, s.session_ed25519, s.subkey_tag, s.signature, s.signature_ts,
                   s.want_data, s.enc_key, s.service, s.svcid, s.svcdata,
                   COALESCE(array_agg(n.namespace ORDER BY n.namespace) FILTER (WHERE n.namespace IS NOT NULL), '{}') AS namespaces
            FROM subscriptions s
            LEFT JOIN sub_namespaces n ON n.subscription = s.id
            WHERE s.signature_ts >= $1
            GROUP BY s.id
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let account: Vec<u8> = row.try_get("account")?;
            let session_ed25519: Vec<u8> = row.try_get("session_ed25519")?;
            let subkey_tag: Option<Vec<u8>> = row.try_get("subkey_tag")?;
            let signature: Vec<u8> = row.try_get("signature")?;
            let enc_key: Vec<u8> = row.try_get("enc_key")?;
            let namespaces: Vec<i16> = row.try_get("namespaces")?;

            out.push(PersistedSubscription {
                account: to_array_33(&account),
                session_ed25519: to_array_32(&session_ed25519),
                subkey_tag: subkey_tag.map(|t| to_array_32(&t)),
                signature: to_array_64(&signature),
                signature_ts: row.try_get("signature_ts")?,
                want_data: row.try_get("want_data")?,
                enc_key: to_array_32(&enc_key),
                service: row.try_get("service")?,
                service_id: row.try_get("svcid")?,
                service_data: row.try_get("svcdata")?,
                namespaces,
            });
        }
        Ok(out)
    }

    async fn delete_expired(&self, now: i64, expiry_secs: i64) -> Result<u64> {
        let cutoff = now - expiry_secs;
        let result = sqlx::query("DELETE FROM subscriptions WHERE signature_ts < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn to_array_32(v: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&v[..32]);
    out
}

fn to_array_33(v: &[u8]) -> [u8; 33] {
    let mut out = [0u8; 33];
    out.copy_from_slice(&v[..33]);
    out
}

fn to_array_64(v: &[u8]) -> [u8; 64] {
    let mut out = [0u8; 64];
    out.copy_from_slice(&v[..64]);
    out
}
