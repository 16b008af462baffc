//! Client-facing JSON request/response bodies for `subscribe` and `unsubscribe`.

use hivemind_core::SubscribeCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bytes::{decode_bytes, decode_sized_array};
use crate::error::{ProtoError, Result};

/// Raw, not-yet-validated `subscribe` request body.
#[derive(Clone, Debug, Deserialize)]
pub struct SubscribeRequest {
    pub pubkey: String,
    pub session_ed25519: Option<String>,
    pub subkey_tag: Option<String>,
    pub namespaces: Vec<i32>,
    #[serde(default)]
    pub data: bool,
    pub sig_ts: i64,
    pub signature: String,
    pub service: String,
    #[serde(default)]
    pub service_info: Value,
    pub enc_key: String,
}

/// Fields of [`SubscribeRequest`] decoded to fixed-size byte arrays.
pub struct DecodedSubscribeRequest {
    pub account_id: [u8; 33],
    pub session_ed25519: Option<[u8; 32]>,
    pub subkey_tag: Option<[u8; 32]>,
    pub namespaces: Vec<i16>,
    pub want_data: bool,
    pub sig_ts: i64,
    pub signature: [u8; 64],
    pub service: String,
    pub service_info: Value,
    pub enc_key: [u8; 32],
}

impl SubscribeRequest {
    pub fn decode(&self) -> Result<DecodedSubscribeRequest> {
        let account_id = decode_sized_array::<33>("pubkey", &self.pubkey)?;
        let session_ed25519 = self
            .session_ed25519
            .as_deref()
            .map(|s| decode_sized_array::<32>("session_ed25519", s))
            .transpose()?;
        let subkey_tag = self
            .subkey_tag
            .as_deref()
            .map(|s| decode_sized_array::<32>("subkey_tag", s))
            .transpose()?;
        let signature = decode_sized_array::<64>("signature", &self.signature)?;
        let enc_key = decode_sized_array::<32>("enc_key", &self.enc_key)?;
        let namespaces = self
            .namespaces
            .iter()
            .map(|&n| {
                i16::try_from(n).map_err(|_| hivemind_core::CoreError::NamespaceOutOfRange(n).into())
            })
            .collect::<Result<Vec<i16>>>()?;

        Ok(DecodedSubscribeRequest {
            account_id,
            session_ed25519,
            subkey_tag,
            namespaces,
            want_data: self.data,
            sig_ts: self.sig_ts,
            signature,
            service: self.service.clone(),
            service_info: self.service_info.clone(),
            enc_key,
        })
    }
}

/// Raw, not-yet-validated `unsubscribe` request body (same id/signature fields as subscribe,
/// minus namespaces/data/enc_key/service_info).
#[derive(Clone, Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub pubkey: String,
    pub session_ed25519: Option<String>,
    pub subkey_tag: Option<String>,
    pub sig_ts: i64,
    pub signature: String,
    pub service: String,
    pub service_id: String,
}

pub struct DecodedUnsubscribeRequest {
    pub account_id: [u8; 33],
    pub session_ed25519: Option<[u8; 32]>,
    pub subkey_tag: Option<[u8; 32]>,
    pub sig_ts: i64,
    pub signature: [u8; 64],
    pub service: String,
    pub service_id: String,
}

impl UnsubscribeRequest {
    pub fn decode(&self) -> Result<DecodedUnsubscribeRequest> {
        Ok(DecodedUnsubscribeRequest {
            account_id: decode_sized_array::<33>("pubkey", &self.pubkey)?,
            session_ed25519: self
                .session_ed25519
                .as_deref()
                .map(|s| decode_sized_array::<32>("session_ed25519", s))
                .transpose()?,
            subkey_tag: self
                .subkey_tag
                .as_deref()
                .map(|s| decode_sized_array::<32>("subkey_tag", s))
                .transpose()?,
            sig_ts: self.sig_ts,
            signature: decode_sized_array::<64>("signature", &self.signature)?,
            service: self.service.clone(),
            service_id: self.service_id.clone(),
        })
    }
}

/// Successful `subscribe`/`unsubscribe` response.
#[derive(Clone, Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<bool>,
    pub message: String,
}

impl SuccessResponse {
    pub fn added(message: impl Into<String>) -> Self {
        Self { success: true, added: Some(true), updated: None, removed: None, message: message.into() }
    }
    pub fn updated(message: impl Into<String>) -> Self {
        Self { success: true, added: None, updated: Some(true), removed: None, message: message.into() }
    }
    pub fn removed(found: bool, message: impl Into<String>) -> Self {
        Self { success: true, added: None, updated: None, removed: Some(found), message: message.into() }
    }
}

/// Failure response: `{ "error": <code>, "message": ... }`.
#[derive(Clone, Debug, Serialize)]
pub struct ErrorResponse {
    pub error: i32,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: SubscribeCode, message: impl Into<String>) -> Self {
        Self { error: code.as_i32(), message: message.into() }
    }
}

/// Extracts arbitrary hex/base64 bytes embedded in a client JSON payload, such as the opaque
/// `service_info` handed to a notifier.
pub fn decode_opaque_field(field: &'static str, s: &str) -> Result<Vec<u8>> {
    decode_bytes(field, s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_request_decodes_hex_fields() {
        let req = SubscribeRequest {
            pubkey: hex::encode([5u8; 33]),
            session_ed25519: Some(hex::encode([1u8; 32])),
            subkey_tag: None,
            namespaces: vec![0, 1, 2],
            data: true,
            sig_ts: 1700,
            signature: hex::encode([2u8; 64]),
            service: "apns".into(),
            service_info: serde_json::json!({"token": "abc"}),
            enc_key: hex::encode([3u8; 32]),
        };
        let decoded = req.decode().unwrap();
        assert_eq!(decoded.account_id, [5u8; 33]);
        assert_eq!(decoded.namespaces, vec![0, 1, 2]);
        assert!(decoded.want_data);
    }

    #[test]
    fn out_of_range_namespace_is_rejected_instead_of_wrapped() {
        let req = SubscribeRequest {
            pubkey: hex::encode([5u8; 33]),
            session_ed25519: Some(hex::encode([1u8; 32])),
            subkey_tag: None,
            namespaces: vec![0, 40_000],
            data: false,
            sig_ts: 1700,
            signature: hex::encode([2u8; 64]),
            service: "apns".into(),
            service_info: serde_json::Value::Null,
            enc_key: hex::encode([3u8; 32]),
        };
        let err = req.decode().unwrap_err();
        assert!(matches!(
            err,
            ProtoError::Core(hivemind_core::CoreError::NamespaceOutOfRange(40_000))
        ));
    }

    #[test]
    fn success_response_serializes_added_flag() {
        let resp = SuccessResponse::added("ok");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], serde_json::json!(true));
        assert_eq!(json["added"], serde_json::json!(true));
        assert!(json.get("updated").is_none());
    }
}
