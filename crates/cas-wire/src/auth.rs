//! CAS digest authentication: `MD5(destId:realm:password) -> A1`; `MD5(A1:nonce) -> response`.

use md5::{Digest, Md5};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("CAS rejected authentication with resultCode {0}")]
    Rejected(String),
    #[error("challenge response missing required field: {0}")]
    MissingField(&'static str),
}

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode_upper(hasher.finalize())
}

/// Computes `MD5(destId:realm:password)`, the A1 digest.
pub fn a1(dest_id: &str, realm: &str, password: &str) -> String {
    md5_hex(&format!("{dest_id}:{realm}:{password}"))
}

/// Computes the challenge response `MD5(A1:nonce)`, upper-cased hex as CAS expects.
pub fn challenge_response(dest_id: &str, realm: &str, password: &str, nonce: &str) -> String {
    let a1 = a1(dest_id, realm, password);
    md5_hex(&format!("{a1}:{nonce}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_is_deterministic_for_same_inputs() {
        let r1 = challenge_response("KR.DEST1", "cas-realm", "hunter2", "abc123");
        let r2 = challenge_response("KR.DEST1", "cas-realm", "hunter2", "abc123");
        assert_eq!(r1, r2);
        assert_eq!(r1.len(), 32);
    }

    #[test]
    fn response_changes_with_nonce() {
        let r1 = challenge_response("KR.DEST1", "cas-realm", "hunter2", "nonce-a");
        let r2 = challenge_response("KR.DEST1", "cas-realm", "hunter2", "nonce-b");
        assert_ne!(r1, r2);
    }
}
