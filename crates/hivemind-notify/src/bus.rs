//! Registry of named notifier workers: routes validate/push RPCs to the correct connection and
//! aggregates their reported stats.
//!
//! Like [`hivemind_store::SubscriptionStore`], this holds no lock of its own: it is designed to
//! live inside a coordinator's single mutex, with connection I/O awaited outside that lock by
//! the caller (clone the `Arc<dyn NotifierConnection>` out, drop the guard, await, re-acquire to
//! record the outcome).

use std::collections::HashMap;
use std::time::Duration;

use hivemind_proto::{decode_service_stats, encode_validate_request, ValidateReply};

use crate::connection::SharedConnection;
use crate::error::{NotifyError, Result};
use crate::stats::ServiceStats;

const MIN_SVC_ID_LEN: usize = 32;

pub struct NotifierBus {
    services: HashMap<String, SharedConnection>,
    stats: HashMap<String, ServiceStats>,
}

impl Default for NotifierBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifierBus {
    pub fn new() -> Self {
        Self { services: HashMap::new(), stats: HashMap::new() }
    }

    /// Registers (or replaces) the connection for `name`. Called when a worker's
    /// `admin.register_service` arrives, both on initial startup and on its periodic watchdog
    /// re-registration.
    pub fn register_service(&mut self, name: String, conn: SharedConnection) {
        self.stats.entry(name.clone()).or_default();
        self.services.insert(name, conn);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn registered_services(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(|s| s.as_str())
    }

    /// Returns the connection to validate/push against, or `ServiceNotAvailable`. The actual
    /// RPC is awaited by the caller outside the coordinator lock; this method only looks up the
    /// routing target.
    pub fn connection(&self, name: &str) -> Result<SharedConnection> {
        self.services.get(name).cloned().ok_or_else(|| NotifyError::ServiceNotAvailable(name.to_string()))
    }

    /// Builds the raw `notifier.validate` request body for `service_info`.
    pub fn build_validate_request(&self, service: &str, service_info: &serde_json::Value) -> Result<Vec<u8>> {
        Ok(encode_validate_request(service, service_info)?)
    }

    /// Interprets a raw validate reply, enforcing the `svc_id` length floor.
    pub fn interpret_validate_reply(&self, service: &str, raw: &[u8]) -> Result<(String, Option<Vec<u8>>)> {
        match hivemind_proto::decode_validate_reply(raw)? {
            ValidateReply::Ok { svc_id, svc_data } => {
                if svc_id.len() < MIN_SVC_ID_LEN {
                    return Err(NotifyError::SvcIdTooShort(service.to_string()));
                }
                Ok((svc_id, svc_data))
            }
            ValidateReply::Error { code, message } => {
                Err(NotifyError::Rejected { service: service.to_string(), code, message })
            }
        }
    }

    /// Merges a worker's `admin.service_stats` report into its running counters.
    pub fn record_stats_report(&mut self, service: &str, raw: &[u8]) -> Result<()> {
        let report = decode_service_stats(raw)?;
        self.stats.entry(service.to_string()).or_default().apply_report(report);
        Ok(())
    }

    pub fn stats_snapshot(&self, service: &str) -> Option<&ServiceStats> {
        self.stats.get(service)
    }

    pub fn all_stats(&self) -> impl Iterator<Item = (&str, &ServiceStats)> {
        self.stats.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Default timeout for a `notifier.validate` round-trip.
pub const DEFAULT_VALIDATE_TIMEOUT: Duration = Duration::from_secs(5);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::NotifierConnection;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FakeConnection;

    #[async_trait]
    impl NotifierConnection for FakeConnection {
        async fn validate(&self, _body: Vec<u8>, _timeout: Duration) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn push(&self, _body: Vec<u8>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn unregistered_service_reports_not_available() {
        let bus = NotifierBus::new();
        assert!(matches!(bus.connection("apns"), Err(NotifyError::ServiceNotAvailable(_))));
    }

    #[test]
    fn registering_then_querying_succeeds() {
        let mut bus = NotifierBus::new();
        bus.register_service("apns".into(), Arc::new(FakeConnection));
        assert!(bus.is_registered("apns"));
        assert!(bus.connection("apns").is_ok());
    }

    #[test]
    fn short_svc_id_is_rejected() {
        let bus = NotifierBus::new();
        let raw = serde_bencode::ser::to_bytes(&serde_bencode::value::Value::List(vec![
            serde_bencode::value::Value::Bytes(b"0".to_vec()),
            serde_bencode::value::Value::Bytes(b"short".to_vec()),
        ]))
        .unwrap();
        assert!(matches!(
            bus.interpret_validate_reply("apns", &raw),
            Err(NotifyError::SvcIdTooShort(_))
        ));
    }

    #[test]
    fn error_reply_is_propagated_with_code() {
        let bus = NotifierBus::new();
        let raw = serde_bencode::ser::to_bytes(&serde_bencode::value::Value::List(vec![
            serde_bencode::value::Value::Bytes(b"4".to_vec()),
            serde_bencode::value::Value::Bytes(b"boom".to_vec()),
        ]))
        .unwrap();
        match bus.interpret_validate_reply("apns", &raw) {
            Err(NotifyError::Rejected { code, message, .. }) => {
                assert_eq!(code, 4);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
