//! Wire formats exchanged with notifier workers: `notifier.validate` and `notifier.push`.

use serde::{Deserialize, Serialize};
use serde_bencode::ser::to_bytes;
use serde_bencode::value::Value as BValue;
use serde_bytes::ByteBuf;

use crate::error::{ProtoError, Result};

/// Builds the two-part `notifier.validate` request: `[service_name, service_info_json]`.
pub fn encode_validate_request(service_name: &str, service_info: &serde_json::Value) -> Result<Vec<u8>> {
    let parts = (
        ByteBuf::from(service_name.as_bytes().to_vec()),
        ByteBuf::from(serde_json::to_vec(service_info)?),
    );
    to_bytes(&parts).map_err(|e| ProtoError::BencodeEncode(e.to_string()))
}

/// Outcome of a `notifier.validate` round-trip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidateReply {
    Ok { svc_id: String, svc_data: Option<Vec<u8>> },
    Error { code: i32, message: String },
}

/// Decodes a `notifier.validate` reply: `["0", svc_id[, svc_data]]` on success, or
/// `["<nonzero_code>", message]` on failure.
pub fn decode_validate_reply(raw: &[u8]) -> Result<ValidateReply> {
    let value: BValue =
        serde_bencode::de::from_bytes(raw).map_err(|e| ProtoError::BencodeDecode(e.to_string()))?;
    let items = match value {
        BValue::List(items) => items,
        _ => return Err(ProtoError::BencodeDecode("validate reply is not a list".into())),
    };

    let code_str = bytes_field(items.first(), "code")?;
    let code: i32 = std::str::from_utf8(&code_str)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ProtoError::BencodeDecode("validate reply code is not an integer".into()))?;

    if code == 0 {
        let svc_id = bytes_field(items.get(1), "svc_id")?;
        let svc_id = String::from_utf8(svc_id)
            .map_err(|_| ProtoError::BencodeDecode("svc_id is not utf8".into()))?;
        let svc_data = match items.get(2) {
            Some(BValue::Bytes(b)) => Some(b.clone()),
            _ => None,
        };
        Ok(ValidateReply::Ok { svc_id, svc_data })
    } else {
        let message = bytes_field(items.get(1), "message")?;
        let message = String::from_utf8_lossy(&message).into_owned();
        Ok(ValidateReply::Error { code, message })
    }
}

fn bytes_field(v: Option<&BValue>, name: &'static str) -> Result<Vec<u8>> {
    match v {
        Some(BValue::Bytes(b)) => Ok(b.clone()),
        _ => Err(ProtoError::MissingField(name)),
    }
}

/// A fire-and-forget `notifier.push` envelope.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushEnvelope {
    #[serde(rename = "")]
    pub service: String,
    #[serde(rename = "&")]
    pub svc_id: ByteBuf,
    #[serde(rename = "!", skip_serializing_if = "Option::is_none", default)]
    pub svc_data: Option<ByteBuf>,
    #[serde(rename = "^")]
    pub enc_key: ByteBuf,
    #[serde(rename = "#")]
    pub msg_hash: ByteBuf,
    #[serde(rename = "@")]
    pub account: ByteBuf,
    #[serde(rename = "n")]
    pub namespace: i32,
    #[serde(rename = "t")]
    pub timestamp: i64,
    #[serde(rename = "z")]
    pub expiry: i64,
    #[serde(rename = "~", skip_serializing_if = "Option::is_none", default)]
    pub body: Option<ByteBuf>,
}

impl PushEnvelope {
    pub fn encode(&self) -> Result<Vec<u8>> {
        to_bytes(self).map_err(|e| ProtoError::BencodeEncode(e.to_string()))
    }
}

/// A `admin.service_stats` report pushed by a notifier worker: a bencoded dict of integer or
/// string values (integers accumulate into bus counters, strings replace them).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatValue {
    Int(i64),
    Text(String),
}

pub fn decode_service_stats(raw: &[u8]) -> Result<Vec<(String, StatValue)>> {
    let value: BValue =
        serde_bencode::de::from_bytes(raw).map_err(|e| ProtoError::BencodeDecode(e.to_string()))?;
    let dict = match value {
        BValue::Dict(d) => d,
        _ => return Err(ProtoError::BencodeDecode("service_stats is not a dict".into())),
    };
    let mut out = Vec::with_capacity(dict.len());
    for (k, v) in dict {
        let key = String::from_utf8_lossy(&k).into_owned();
        let value = match v {
            BValue::Int(i) => StatValue::Int(i),
            BValue::Bytes(b) => StatValue::Text(String::from_utf8_lossy(&b).into_owned()),
            _ => continue,
        };
        out.push((key, value));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_reply_ok_without_svc_data() {
        let raw = to_bytes(&(ByteBuf::from(b"0".to_vec()), ByteBuf::from(b"a".repeat(40)))).unwrap();
        let reply = decode_validate_reply(&raw).unwrap();
        assert_eq!(reply, ValidateReply::Ok { svc_id: "a".repeat(40), svc_data: None });
    }

    #[test]
    fn validate_reply_error_carries_code_and_message() {
        let raw = to_bytes(&(ByteBuf::from(b"2".to_vec()), ByteBuf::from(b"bad token".to_vec()))).unwrap();
        let reply = decode_validate_reply(&raw).unwrap();
        assert_eq!(reply, ValidateReply::Error { code: 2, message: "bad token".into() });
    }

    #[test]
    fn push_envelope_round_trips() {
        let env = PushEnvelope {
            service: "apns".into(),
            svc_id: ByteBuf::from(b"a".repeat(40)),
            svc_data: None,
            enc_key: ByteBuf::from(vec![1u8; 32]),
            msg_hash: ByteBuf::from(vec![2u8; 32]),
            account: ByteBuf::from(vec![5u8; 33]),
            namespace: 0,
            timestamp: 1700,
            expiry: 1800,
            body: Some(ByteBuf::from(vec![9u8; 10])),
        };
        let encoded = env.encode().unwrap();
        let decoded: PushEnvelope = serde_bencode::de::from_bytes(&encoded).unwrap();
        assert_eq!(decoded, env);
    }
}
