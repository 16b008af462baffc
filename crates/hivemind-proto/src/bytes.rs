//! Client JSON carries binary fields as either hex or unpadded base64; this module
//! picks whichever decodes cleanly and fixes them to the expected length.

use crate::error::{ProtoError, Result};
use base64::Engine;

fn looks_like_hex(s: &str) -> bool {
    !s.is_empty() && s.len() % 2 == 0 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Decodes a client-supplied string field as hex or unpadded base64, requiring the result to be
/// exactly `expected_len` bytes.
pub fn decode_sized(field: &'static str, s: &str, expected_len: usize) -> Result<Vec<u8>> {
    let decoded = if looks_like_hex(s) {
        hex::decode(s).map_err(|_| ProtoError::BadByteEncoding(field))?
    } else {
        base64::engine::general_purpose::STANDARD_NO_PAD
            .decode(s.trim_end_matches('='))
            .map_err(|_| ProtoError::BadByteEncoding(field))?
    };
    if decoded.len() != expected_len {
        return Err(ProtoError::BadFieldLength(field, expected_len, decoded.len()));
    }
    Ok(decoded)
}

pub fn decode_sized_array<const N: usize>(field: &'static str, s: &str) -> Result<[u8; N]> {
    let v = decode_sized(field, s, N)?;
    let mut out = [0u8; N];
    out.copy_from_slice(&v);
    Ok(out)
}

/// Decodes a client-supplied byte field of unspecified length (hex or unpadded base64).
pub fn decode_bytes(field: &'static str, s: &str) -> Result<Vec<u8>> {
    if looks_like_hex(s) {
        hex::decode(s).map_err(|_| ProtoError::BadByteEncoding(field))
    } else {
        base64::engine::general_purpose::STANDARD_NO_PAD
            .decode(s.trim_end_matches('='))
            .map_err(|_| ProtoError::BadByteEncoding(field))
    }
}
