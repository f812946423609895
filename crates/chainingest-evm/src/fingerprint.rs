//! EVM event fingerprints.
//!
//! The fingerprint of an event is the keccak256 hash of its canonical
//! signature string, e.g.:
//!   keccak256("Swap(address,address,int256,int256,uint160,uint128,int24)")
//!   → 0xc42079f94a6350d7e6235f29174924f928cc2ac818eb64fed8004e115fbcca67
//!
//! For raw logs, `topics[0]` is the fingerprint.

use tiny_keccak::{Hasher, Keccak};

/// Lowercase `0x…` keccak256 of an event signature such as
/// `"Transfer(address,address,uint256)"`.
pub fn keccak256_signature(signature: &str) -> String {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(signature.as_bytes());
    hasher.finalize(&mut output);
    format!("0x{}", hex::encode(output))
}

/// `topics[0]`, normalised to lowercase, if it looks like a 32-byte hash.
pub fn from_topics(topics: &[String]) -> Option<String> {
    let first = topics.first()?;
    let hex = first.strip_prefix("0x").unwrap_or(first);
    if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(format!("0x{}", hex.to_ascii_lowercase()))
    } else {
        None
    }
}
