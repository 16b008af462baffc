//! The monitored-subscriber identity and its swarm-ring placement.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// A monitored subscriber identity: 33 bytes, first byte a network prefix.
///
/// For the `0x05` (Session ID) prefix, `id[1..]` is an X25519 key derived from an externally
/// supplied Ed25519 key (`ed25519_pubkey`). For any other prefix, `id[1..]` *is* the Ed25519
/// pubkey directly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    id: [u8; 33],
    ed25519_pubkey: [u8; 32],
    swarm_space: u64,
    swarm: Option<u64>,
}

/// Network prefix byte denoting a Session ID (whose `id[1..]` is an X25519 key derived from
/// an Ed25519 key supplied out of band).
pub const SESSION_ID_PREFIX: u8 = 0x05;

impl Account {
    /// Constructs an Account from a 33-byte id and, for `0x05`-prefixed ids, the Ed25519
    /// pubkey it must convert from. Validates that the session_ed25519-to-X25519 derivation
    /// matches `id[1..]`, and computes `swarm_space`, which is stable for the lifetime of
    /// the account.
    pub fn new(id: [u8; 33], session_ed25519: Option<[u8; 32]>) -> Result<Self> {
        let is_session_id = id[0] == SESSION_ID_PREFIX;

        let ed25519_pubkey = match (is_session_id, session_ed25519) {
            (true, Some(ed)) => {
                hivemind_crypto::verify_session_id_derivation(&id, &ed)
                    .map_err(|_| CoreError::SessionIdMismatch)?;
                ed
            }
            (true, None) => return Err(CoreError::MissingSessionEd25519),
            (false, None) => {
                let mut ed = [0u8; 32];
                ed.copy_from_slice(&id[1..33]);
                ed
            }
            (false, Some(_)) => return Err(CoreError::UnexpectedSessionEd25519),
        };

        let swarm_space = swarm_space_of(&id);
        Ok(Self {
            id,
            ed25519_pubkey,
            swarm_space,
            swarm: None,
        })
    }

    pub fn id(&self) -> &[u8; 33] {
        &self.id
    }

    pub fn ed25519_pubkey(&self) -> &[u8; 32] {
        &self.ed25519_pubkey
    }

    pub fn swarm_space(&self) -> u64 {
        self.swarm_space
    }

    pub fn swarm(&self) -> Option<u64> {
        self.swarm
    }

    /// Updates `self.swarm` to the ring-closest entry of `sorted_swarm_ids`. Returns `true` if the swarm assignment changed.
    ///
    /// `sorted_swarm_ids` must be sorted ascending and non-empty; callers (SwarmTopology) are
    /// responsible for filtering out the `2^64 - 1` "no swarm" sentinel before calling this.
    pub fn update_swarm(&mut self, sorted_swarm_ids: &[u64]) -> bool {
        let placement = closest_swarm(sorted_swarm_ids, self.swarm_space);
        if Some(placement) == self.swarm {
            return false;
        }
        self.swarm = Some(placement);
        true
    }
}

impl PartialEq for Account {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Account {}

impl Hash for Account {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // A random 8-byte chunk of the pubkey is already uniformly distributed; no need to
        // hash the full 33 bytes.
        state.write(&self.id[16..24]);
    }
}

/// Computes the swarm-space value for a 33-byte account id: the XOR of the four 8-byte
/// big-endian integers in `id[1..33]`.
pub fn swarm_space_of(id: &[u8; 33]) -> u64 {
    let mut acc = 0u64;
    for chunk in id[1..33].chunks_exact(8) {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        acc ^= u64::from_be_bytes(buf);
    }
    acc
}

/// Binary-search for the ring-closest entry of `sorted_swarm_ids` to `swarm_space`, wrapping
/// around a 64-bit ring. Ties go to the left (lower-index) candidate.
///
/// `sorted_swarm_ids` must be non-empty and sorted ascending.
pub fn closest_swarm(sorted_swarm_ids: &[u64], swarm_space: u64) -> u64 {
    assert!(!sorted_swarm_ids.is_empty(), "swarm id list must not be empty");

    let mut lo = 0usize;
    let mut hi = sorted_swarm_ids.len();
    while lo < hi {
        let mid = (lo + hi) / 2;
        if sorted_swarm_ids[mid] < swarm_space {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    let mut i_right = lo;
    if i_right == sorted_swarm_ids.len() {
        i_right = 0;
    }
    let i_left = if i_right > 0 { i_right - 1 } else { sorted_swarm_ids.len() - 1 };

    let right = sorted_swarm_ids[i_right];
    let left = sorted_swarm_ids[i_left];

    let d_right = right.wrapping_sub(swarm_space);
    let d_left = swarm_space.wrapping_sub(left);

    if d_right < d_left {
        right
    } else {
        left
    }
}
