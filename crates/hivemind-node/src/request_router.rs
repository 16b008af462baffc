//! Endpoint dispatch for the authenticated RPC listener: `subscribe`,
//! `unsubscribe`, the `admin.*` control surface, and the `notify.*` callback endpoints, plus
//! the "notifiers ready" gate that defers client-facing RPCs until at least one notifier has
//! registered or `startup_wait` has elapsed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use hivemind_core::{now_unix, SubscribeCode};
use hivemind_proto::{ErrorResponse, NotifyMessage, SubscribeRequest, UnsubscribeRequest};
use serde_json::Value;

use crate::coordinator::{Coordinator, RouterError};

/// Request body size cap.
const MAX_CLIENT_BODY_BYTES: usize = 100_000;

pub struct RequestRouter {
    coordinator: Arc<Coordinator>,
    started_at: Instant,
    startup_wait_ms: u64,
    notifier_seen: AtomicBool,
}

impl RequestRouter {
    pub fn new(coordinator: Arc<Coordinator>, startup_wait_ms: u64) -> Arc<Self> {
        Arc::new(Self { coordinator, started_at: Instant::now(), startup_wait_ms, notifier_seen: AtomicBool::new(false) })
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn notifier_registered(&self) {
        self.notifier_seen.store(true, Ordering::Relaxed);
    }

    fn notifiers_ready(&self) -> bool {
        self.notifier_seen.load(Ordering::Relaxed) || self.started_at.elapsed().as_millis() as u64 >= self.startup_wait_ms
    }

    /// Dispatches one decrypted client/admin RPC frame. `is_admin` reflects whether the peer's
    /// pubkey matched `listen_curve_admin`; `admin.*` methods are refused otherwise.
    pub async fn dispatch(&self, method: &str, is_admin: bool, body: &[u8]) -> Vec<u8> {
        if body.len() > MAX_CLIENT_BODY_BYTES {
            return error_json(SubscribeCode::BadInput, "request body too large");
        }

        match method {
            "subscribe" => self.handle_subscribe(body).await,
            "unsubscribe" => self.handle_unsubscribe(body).await,
            "admin.register_service" if is_admin => self.handle_admin_register_service(body).await,
            "admin.get_stats" if is_admin => self.handle_admin_get_stats().await,
            "notify.block" if is_admin => self.handle_notify_block().await,
            "notify.message" if is_admin => self.handle_notify_message(body).await,
            method if method.starts_with("admin.") => error_json(SubscribeCode::BadInput, "admin endpoint requires admin authorization"),
            other => error_json(SubscribeCode::BadInput, &format!("unknown method {other:?}")),
        }
    }

    /// Answers a request a notifier worker sent over its own `FramedNotifierConnection`
    /// (`admin.register_service` re-announcements, `admin.service_stats` reports).
    pub async fn handle_worker_request(&self, service: &str, method: &str, body: &[u8]) -> Vec<u8> {
        match method {
            "admin.register_service" => {
                self.notifier_registered();
                serde_json::to_vec(&serde_json::json!({"ok": true})).unwrap_or_default()
            }
            "admin.service_stats" => match self.coordinator.record_stats_report(service, body).await {
                Ok(()) => serde_json::to_vec(&serde_json::json!({"ok": true})).unwrap_or_default(),
                Err(err) => error_json(err.code(), &err.to_string()),
            },
            other => error_json(SubscribeCode::BadInput, &format!("unknown worker method {other:?}")),
        }
    }

    async fn handle_subscribe(&self, body: &[u8]) -> Vec<u8> {
        if !self.notifiers_ready() {
            return error_json(SubscribeCode::ServiceNotAvailable, "no notifiers registered yet");
        }
        let Ok(value) = serde_json::from_slice::<Value>(body) else {
            return error_json(SubscribeCode::BadInput, "malformed json body");
        };
        let now = now_unix();

        match value {
            Value::Array(items) => {
                let mut replies = Vec::with_capacity(items.len());
                for item in items {
                    replies.push(self.subscribe_one(item, now).await);
                }
                serde_json::to_vec(&replies).unwrap_or_default()
            }
            single => serde_json::to_vec(&self.subscribe_one(single, now).await).unwrap_or_default(),
        }
    }

    async fn subscribe_one(&self, value: Value, now: i64) -> Value {
        let req: SubscribeRequest = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(err) => return error_value(SubscribeCode::BadInput, &err.to_string()),
        };
        let decoded = match req.decode() {
            Ok(d) => d,
            Err(err) => return error_value(SubscribeCode::BadInput, &err.to_string()),
        };
        match self.coordinator.subscribe(decoded, now).await {
            Ok(resp) => serde_json::to_value(resp).unwrap_or(Value::Null),
            Err(err) => error_value(err.code(), &err.to_string()),
        }
    }

    async fn handle_unsubscribe(&self, body: &[u8]) -> Vec<u8> {
        let Ok(value) = serde_json::from_slice::<Value>(body) else {
            return error_json(SubscribeCode::BadInput, "malformed json body");
        };
        let now = now_unix();

        match value {
            Value::Array(items) => {
                let mut replies = Vec::with_capacity(items.len());
                for item in items {
                    replies.push(self.unsubscribe_one(item, now).await);
                }
                serde_json::to_vec(&replies).unwrap_or_default()
            }
            single => serde_json::to_vec(&self.unsubscribe_one(single, now).await).unwrap_or_default(),
        }
    }

    async fn unsubscribe_one(&self, value: Value, now: i64) -> Value {
        let req: UnsubscribeRequest = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(err) => return error_value(SubscribeCode::BadInput, &err.to_string()),
        };
        let decoded = match req.decode() {
            Ok(d) => d,
            Err(err) => return error_value(SubscribeCode::BadInput, &err.to_string()),
        };
        match self.coordinator.unsubscribe(decoded, now).await {
            Ok(resp) => serde_json::to_value(resp).unwrap_or(Value::Null),
            Err(err) => error_value(err.code(), &err.to_string()),
        }
    }

    /// `admin.register_service` as reachable from an admin RPC connection (rather than a
    /// notifier worker's own handshake) is a registration-status query: the live `SharedConnection`
    /// can only be established by the worker dialing in itself, so this just reports
    /// whether a worker by that name is currently connected (see DESIGN.md).
    async fn handle_admin_register_service(&self, body: &[u8]) -> Vec<u8> {
        #[derive(serde::Deserialize)]
        struct Req {
            service: String,
        }
        let Ok(req) = serde_json::from_slice::<Req>(body) else {
            return error_json(SubscribeCode::BadInput, "malformed json body");
        };
        let registered = self.coordinator.is_service_registered(&req.service).await;
        serde_json::to_vec(&serde_json::json!({"service": req.service, "registered": registered})).unwrap_or_default()
    }

    async fn handle_admin_get_stats(&self) -> Vec<u8> {
        let stats = self.coordinator.get_stats().await;
        serde_json::to_vec(&stats).unwrap_or_default()
    }

    async fn handle_notify_block(&self) -> Vec<u8> {
        self.coordinator.refresh_topology().await;
        serde_json::to_vec(&serde_json::json!({"ok": true})).unwrap_or_default()
    }

    async fn handle_notify_message(&self, body: &[u8]) -> Vec<u8> {
        match NotifyMessage::decode(body) {
            Ok(msg) => {
                self.coordinator.handle_notify_message([0u8; 32], msg, now_unix()).await;
                serde_json::to_vec(&serde_json::json!({"ok": true})).unwrap_or_default()
            }
            Err(err) => error_json(SubscribeCode::BadInput, &err.to_string()),
        }
    }
}

fn error_value(code: SubscribeCode, message: &str) -> Value {
    serde_json::to_value(ErrorResponse::new(code, message)).unwrap_or(Value::Null)
}

fn error_json(code: SubscribeCode, message: &str) -> Vec<u8> {
    serde_json::to_vec(&ErrorResponse::new(code, message)).unwrap_or_default()
}
