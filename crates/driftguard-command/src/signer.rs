//! HMAC-SHA256 command signing.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies command payloads under a shared secret key.
#[derive(Clone)]
pub struct CommandSigner {
    key: Vec<u8>,
}

impl CommandSigner {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.as_bytes().to_vec(),
        }
    }

    /// `base64(HMAC-SHA256(key, command_id || action || nonce))`.
    pub fn sign(&self, command_id: &str, action: &str, nonce: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(command_id.as_bytes());
        mac.update(action.as_bytes());
        mac.update(nonce.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    /// Constant-time verification of a stored signature.
    pub fn verify(&self, command_id: &str, action: &str, nonce: &str, signature: &str) -> bool {
        let decoded = match BASE64.decode(signature) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(command_id.as_bytes());
        mac.update(action.as_bytes());
        mac.update(nonce.as_bytes());
        mac.verify_slice(&decoded).is_ok()
    }
}
