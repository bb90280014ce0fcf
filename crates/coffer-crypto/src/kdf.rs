//! Password-based key derivation.
//!
//! Mirrors libsodium's `crypto_pwhash` use of the
//! Argon2i "interactive" limits: the derived key never changes for a given
//! (password, salt) pair, so historical objects stay decryptable as long as
//! the salt object and the declared parameters are preserved in the pipeline
//! header.

use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CryptoError;

/// Length in bytes of the random salt bootstrapped into the remote salt
/// object on first use.
pub const SALT_LEN: usize = 16;

/// Length in bytes of the derived symmetric key (`XChaCha20Poly1305` key
/// size).
pub const KEY_LEN: usize = 32;

/// Argon2i "interactive" parameters, matching the original's
/// `OPSLIMIT_INTERACTIVE` / `MEMLIMIT_INTERACTIVE` pair translated into
/// Argon2's (time cost, memory cost) knobs.
const INTERACTIVE_TIME_COST: u32 = 2;
const INTERACTIVE_MEM_COST_KIB: u32 = 64 * 1024;
const INTERACTIVE_PARALLELISM: u32 = 1;

/// The parameters that were used to derive an object's encryption key,
/// serialised into the pipeline header's `E` field so the object remains
/// self-describing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptParams {
    /// Algorithm tag, always `"ARGON2I13"` for keys produced by this crate.
    #[serde(rename = "A")]
    pub algorithm: String,
    /// Argon2 "ops" (time cost) limit used.
    #[serde(rename = "O")]
    pub ops_limit: u32,
    /// Argon2 memory limit, in KiB.
    #[serde(rename = "M")]
    pub mem_limit_kib: u32,
    /// Base64-encoded salt used for this derivation.
    #[serde(rename = "S")]
    pub salt: String,
}

impl EncryptParams {
    /// Builds the parameter record for a freshly-bootstrapped repository.
    #[must_use]
    pub fn interactive(salt: &[u8; SALT_LEN]) -> Self {
        Self {
            algorithm: "ARGON2I13".to_string(),
            ops_limit: INTERACTIVE_TIME_COST,
            mem_limit_kib: INTERACTIVE_MEM_COST_KIB,
            salt: BASE64.encode(salt),
        }
    }

    /// Decodes the base64 salt back into raw bytes.
    pub fn salt_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        BASE64
            .decode(&self.salt)
            .map_err(|e| CryptoError::InvalidEncryptParams(e.to_string()))
    }

    /// Derives the symmetric key from `password` using these parameters.
    pub fn derive_key(&self, password: &str) -> Result<[u8; KEY_LEN], CryptoError> {
        if password.is_empty() {
            return Err(CryptoError::EmptyPassword);
        }
        let salt = self.salt_bytes()?;
        let params = Params::new(self.mem_limit_kib, self.ops_limit, INTERACTIVE_PARALLELISM, Some(KEY_LEN))
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2i, Version::V0x13, params);
        let mut out = [0u8; KEY_LEN];
        argon2
            .hash_password_into(password.as_bytes(), &salt, &mut out)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        debug!(ops_limit = self.ops_limit, mem_limit_kib = self.mem_limit_kib, "derived key from password");
        Ok(out)
    }
}

/// Generates a fresh random salt for a brand-new repository.
#[must_use]
pub fn generate_salt() -> [u8; SALT_LEN] {
    use rand::RngCore;
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    debug!("generated new KDF salt");
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_password_and_salt_derive_same_key() {
        let salt = generate_salt();
        let params = EncryptParams::interactive(&salt);
        let a = params.derive_key("correct horse battery staple").unwrap();
        let b = params.derive_key("correct horse battery staple").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_passwords_derive_different_keys() {
        let salt = generate_salt();
        let params = EncryptParams::interactive(&salt);
        let a = params.derive_key("password one").unwrap();
        let b = params.derive_key("password two").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_password_is_rejected() {
        let salt = generate_salt();
        let params = EncryptParams::interactive(&salt);
        assert!(matches!(params.derive_key(""), Err(CryptoError::EmptyPassword)));
    }
}
