//! Secret material handling: redaction in memory, AES-256-GCM at rest.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use core::fmt;
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Failures sealing or opening an encrypted secret.
#[derive(Debug, Error)]
pub enum SealError {
    /// Ciphertext is not valid base64 or is too short to carry a nonce.
    #[error("malformed sealed secret")]
    Malformed,
    /// Authenticated decryption failed (wrong root key or corrupted data).
    #[error("sealed secret failed to open")]
    Open,
    /// Encryption failed.
    #[error("sealing failed")]
    Seal,
}

/// An in-memory secret that refuses to serialize or print itself.
///
/// `Debug` and `Display` show only a short prefix; `Serialize` always emits a
/// mask. Callers that genuinely need the raw material (adapters presenting
/// the key upstream, explicit `reveal` exports) use [`expose`](Self::expose).
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap raw secret material.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Access the raw material. Use sparingly; the value must not reach logs.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Masked rendering: first four characters, then an ellipsis.
    #[must_use]
    pub fn masked(&self) -> String {
        let prefix: String = self.0.chars().take(4).collect();
        format!("{prefix}\u{2026}")
    }

    /// SHA-256 hex digest of the raw material, for lookup tables.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut h = Sha256::new();
        h.update(self.0.as_bytes());
        let out = h.finalize();
        out.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({})", self.masked())
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("********")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Self)
    }
}

/// Derive the 32-byte sealing key from the process root secret.
#[must_use]
pub(crate) fn root_key(process_secret: &str) -> [u8; 32] {
    let mut h = Sha256::new();
    h.update(process_secret.as_bytes());
    h.finalize().into()
}

/// An upstream secret encrypted at rest.
///
/// Wire form is `base64(nonce || ciphertext)` with a fresh random nonce per
/// seal. Serializes as a plain string so persisted key stores stay readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedSecret(String);

impl SealedSecret {
    const NONCE_LEN: usize = 12;

    /// Encrypt `secret` under a key derived from `process_secret`.
    ///
    /// # Errors
    /// Returns `SealError::Seal` if encryption fails.
    pub fn seal(secret: &Secret, process_secret: &str) -> Result<Self, SealError> {
        let key = root_key(process_secret);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ct = cipher
            .encrypt(&nonce, secret.expose().as_bytes())
            .map_err(|_| SealError::Seal)?;
        let mut buf = Vec::with_capacity(Self::NONCE_LEN + ct.len());
        buf.extend_from_slice(&nonce);
        buf.extend_from_slice(&ct);
        Ok(Self(B64.encode(buf)))
    }

    /// Decrypt back into an in-memory [`Secret`].
    ///
    /// # Errors
    /// Returns `Malformed` for undecodable input and `Open` when the
    /// authenticated decryption fails.
    pub fn open(&self, process_secret: &str) -> Result<Secret, SealError> {
        let raw = B64.decode(&self.0).map_err(|_| SealError::Malformed)?;
        if raw.len() <= Self::NONCE_LEN {
            return Err(SealError::Malformed);
        }
        let (nonce, ct) = raw.split_at(Self::NONCE_LEN);
        let key = root_key(process_secret);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let pt = cipher
            .decrypt(Nonce::from_slice(nonce), ct)
            .map_err(|_| SealError::Open)?;
        String::from_utf8(pt)
            .map(Secret::new)
            .map_err(|_| SealError::Open)
    }

    /// The opaque stored form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_round_trip() {
        let secret = Secret::new("sk-upstream-123456");
        let sealed = SealedSecret::seal(&secret, "root-passphrase").unwrap();
        let opened = sealed.open("root-passphrase").unwrap();
        assert_eq!(opened.expose(), "sk-upstream-123456");
    }

    #[test]
    fn open_with_wrong_root_fails() {
        let sealed = SealedSecret::seal(&Secret::new("abc"), "right").unwrap();
        assert!(matches!(sealed.open("wrong"), Err(SealError::Open)));
    }

    #[test]
    fn debug_and_serde_are_redacted() {
        let secret = Secret::new("sk-verysecret");
        assert_eq!(format!("{secret:?}"), "Secret(sk-v\u{2026})");
        let json = serde_json::to_string(&secret).unwrap();
        assert_eq!(json, "\"********\"");
    }
}
