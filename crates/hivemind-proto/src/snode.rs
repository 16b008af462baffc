//! Wire formats exchanged directly with service nodes: outbound `monitor.messages` subscribe
//! batches and inbound `notify.message` notifications.

use serde::{Deserialize, Serialize};
use serde_bencode::ser::to_bytes;
use serde_bytes::ByteBuf;

use crate::error::{ProtoError, Result};

/// One account's subscribe record within a `monitor.messages` batch, matching the bencoded
/// dict keys the snode RPC expects.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribeRecord {
    #[serde(rename = "P", skip_serializing_if = "Option::is_none", default)]
    pub ed25519_pubkey: Option<ByteBuf>,
    #[serde(rename = "S", skip_serializing_if = "Option::is_none", default)]
    pub subkey_tag: Option<ByteBuf>,
    #[serde(rename = "d", skip_serializing_if = "Option::is_none", default)]
    pub want_data: Option<i64>,
    #[serde(rename = "n")]
    pub namespaces: Vec<i32>,
    #[serde(rename = "p", skip_serializing_if = "Option::is_none", default)]
    pub raw_id: Option<ByteBuf>,
    #[serde(rename = "s")]
    pub signature: ByteBuf,
    #[serde(rename = "t")]
    pub sig_ts: i64,
}

impl SubscribeRecord {
    /// Builds a record for `account_id`/`ed25519_pubkey` pair: session ids (`0x05` prefix) are
    /// identified by their ed25519 pubkey (key `P`); anything else by the raw id bytes (`p`).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account_id: &[u8; 33],
        ed25519_pubkey: &[u8; 32],
        subkey_tag: Option<&[u8; 32]>,
        want_data: bool,
        namespaces: &[i16],
        signature: &[u8; 64],
        sig_ts: i64,
    ) -> Self {
        let (p, raw_id) = if account_id[0] == hivemind_core::SESSION_ID_PREFIX {
            (Some(ByteBuf::from(ed25519_pubkey.to_vec())), None)
        } else {
            (None, Some(ByteBuf::from(account_id.to_vec())))
        };
        Self {
            ed25519_pubkey: p,
            subkey_tag: subkey_tag.map(|t| ByteBuf::from(t.to_vec())),
            want_data: want_data.then_some(1),
            namespaces: namespaces.iter().map(|&n| n as i32).collect(),
            raw_id,
            signature: ByteBuf::from(signature.to_vec()),
            sig_ts,
        }
    }

    /// Estimated bencoded byte cost of this record, per the batching byte-budget formula: `5 +
    /// 4*len(namespaces) + 15 + 70 + 39`, plus `38` if a subkey tag is present and `6` if
    /// `want_data` is set.
    pub fn estimated_bytes(namespace_count: usize, has_subkey: bool, want_data: bool) -> usize {
        let mut size = 5 + 4 * namespace_count + 15 + 70 + 39;
        if has_subkey {
            size += 38;
        }
        if want_data {
            size += 6;
        }
        size
    }
}

/// Encodes a full `monitor.messages` request batch as a bencoded list.
pub fn encode_monitor_messages(records: &[SubscribeRecord]) -> Result<Vec<u8>> {
    to_bytes(records).map_err(|e| ProtoError::BencodeEncode(e.to_string()))
}

/// An inbound message-arrival notification from a service node (`notify.message`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotifyMessage {
    #[serde(rename = "@")]
    pub account: ByteBuf,
    #[serde(rename = "h")]
    pub msg_hash: ByteBuf,
    #[serde(rename = "n")]
    pub namespace: i32,
    #[serde(rename = "t")]
    pub timestamp: i64,
    #[serde(rename = "z")]
    pub expiry: i64,
    #[serde(rename = "~", skip_serializing_if = "Option::is_none", default)]
    pub body: Option<ByteBuf>,
}

impl NotifyMessage {
    pub fn decode(raw: &[u8]) -> Result<Self> {
        serde_bencode::de::from_bytes(raw).map_err(|e| ProtoError::BencodeDecode(e.to_string()))
    }

    /// The account id as a fixed 33-byte array, if the field has the expected length.
    pub fn account_id(&self) -> Option<[u8; 33]> {
        if self.account.len() != 33 {
            return None;
        }
        let mut out = [0u8; 33];
        out.copy_from_slice(&self.account);
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimated_bytes_matches_formula() {
        assert_eq!(SubscribeRecord::estimated_bytes(3, false, false), 5 + 12 + 15 + 70 + 39);
        assert_eq!(SubscribeRecord::estimated_bytes(3, true, true), 5 + 12 + 15 + 70 + 39 + 38 + 6);
    }

    #[test]
    fn subscribe_record_round_trips_through_bencode() {
        let account_id = [0x05u8; 33];
        let ed = [2u8; 32];
        let sig = [3u8; 64];
        let record = SubscribeRecord::new(&account_id, &ed, None, true, &[0, 1, 2], &sig, 1700);
        let encoded = encode_monitor_messages(&[record.clone()]).unwrap();
        let decoded: Vec<SubscribeRecord> = serde_bencode::de::from_bytes(&encoded).unwrap();
        assert_eq!(decoded, vec![record]);
    }

    #[test]
    fn notify_message_decodes_without_body() {
        let msg = NotifyMessage {
            account: ByteBuf::from(vec![5u8; 33]),
            msg_hash: ByteBuf::from(vec![9u8; 32]),
            namespace: 0,
            timestamp: 1700,
            expiry: 1800,
            body: None,
        };
        let encoded = to_bytes(&msg).unwrap();
        let decoded = NotifyMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.account_id(), Some([5u8; 33]));
    }
}
