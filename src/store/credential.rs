use std::fmt;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Storage account name plus shared key.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SharedKeyCredential {
    pub account: String,
    pub key: String,
}

impl SharedKeyCredential {
    pub fn new(account: impl Into<String>, key: impl Into<String>) -> Self {
        Self { account: account.into(), key: key.into() }
    }

    /// Hex HMAC-SHA256 of `message` under the account key.
    pub fn sign(&self, message: &[u8]) -> String {
        // HMAC accepts keys of any length, so this cannot fail.
        let mut mac = match HmacSha256::new_from_slice(self.key.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC key length is unrestricted"),
        };
        mac.update(message);
        to_hex(&mac.finalize().into_bytes())
    }

    /// Constant-time signature check.
    pub fn verify(&self, message: &[u8], signature: &str) -> bool {
        let Ok(mut mac) = HmacSha256::new_from_slice(self.key.as_bytes()) else {
            return false;
        };
        mac.update(message);
        match from_hex(signature) {
            Some(raw) => mac.verify_slice(&raw).is_ok(),
            None => false,
        }
    }
}

// The key never appears in logs.
impl fmt::Debug for SharedKeyCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedKeyCredential")
            .field("account", &self.account)
            .field("key", &"<redacted>")
            .finish()
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let cred = SharedKeyCredential::new("acct", "secret");
        let sig = cred.sign(b"payload");
        assert_eq!(sig.len(), 64);
        assert!(cred.verify(b"payload", &sig));
        assert!(!cred.verify(b"payload2", &sig));
        assert!(!SharedKeyCredential::new("acct", "other").verify(b"payload", &sig));
        assert!(!cred.verify(b"payload", "zz"));
    }

    #[test]
    fn test_debug_redacts_key() {
        let cred = SharedKeyCredential::new("acct", "secret");
        assert!(!format!("{cred:?}").contains("secret"));
    }
}
