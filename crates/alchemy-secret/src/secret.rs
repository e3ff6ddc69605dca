use serde::{Deserialize, Serialize};

/// A value that must never be written to a `StateStore` or log line in the
/// clear. The engine's serde layer encrypts this into a [`SecretEnvelope`]
/// at every serialization boundary; nothing in this crate ever serializes a
/// `Secret` directly.
#[derive(Clone, Serialize, Deserialize)]
pub struct Secret(String);

impl Secret {
    pub fn new(plaintext: impl Into<String>) -> Self {
        Secret(plaintext.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// The on-disk / wire shape of an encrypted secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretEnvelope {
    #[serde(rename = "@type")]
    pub type_tag: String,
    pub alg: String,
    pub nonce: String,
    pub ciphertext: String,
}

impl SecretEnvelope {
    pub const TYPE_TAG: &'static str = "secret";
    pub const ALG: &'static str = "aes256-gcm-pbkdf2hmacsha256";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_prints_plaintext() {
        let s = Secret::new("super-sensitive");
        let dbg = format!("{s:?}");
        assert!(!dbg.contains("super-sensitive"));
    }
}
