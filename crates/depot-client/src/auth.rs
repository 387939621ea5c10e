//! Signed bearer token for storage nodes.
//!
//! Format: `v2.<hex hmac-sha256(secret, timestamp)>.<timestamp>`. The storage
//! node checks the signature and rejects tokens outside its own clock-skew
//! window; this side only produces tokens.

use depot_core::{DepotError, DepotResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_VERSION: &str = "v2";

/// Sign `issued_at` (Unix seconds) with `secret`.
pub fn authorization_token(secret: &str, issued_at: u64) -> DepotResult<String> {
    let issued_at = issued_at.to_string();
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|err| DepotError::configuration(format!("unusable storage token: {err}")))?;
    mac.update(issued_at.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    Ok(format!("{TOKEN_VERSION}.{signature}.{issued_at}"))
}
