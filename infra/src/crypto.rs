// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! At-rest encryption for the secret-bearing fields of a `StorageConfig`'s `config_json`
//! (API keys, access tokens, shared secrets for S3/WebDAV/OneDrive-style backends). The key
//! is provided out of band (an operator-managed master key, never itself persisted by this
//! crate) and wraps plaintext with AES-SIV, which tolerates nonce reuse without catastrophic
//! failure -- a useful property here since config rows get re-saved with the same nonce
//! strategy across retries.

use aes_siv::aead::generic_array::GenericArray;
use aes_siv::aead::{Aead, KeyInit};
use aes_siv::Aes256SivAead;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;

const KEY_LEN: usize = 64;
const NONCE_LEN: usize = 16;

/// A loaded master key used to seal/unseal secret material before it is written to, or after
/// it is read from, the `storage_configs.config_json` column.
pub struct SecretBox {
    cipher: Aes256SivAead,
}

impl SecretBox {
    /// `key` must be exactly 64 raw bytes (two 256-bit AES-SIV subkeys).
    pub fn new(key: &[u8]) -> Result<Self, String> {
        if key.len() != KEY_LEN {
            return Err(format!(
                "secret box key must be {KEY_LEN} bytes, got {}",
                key.len()
            ));
        }
        let cipher = Aes256SivAead::new(GenericArray::from_slice(key));
        Ok(SecretBox { cipher })
    }

    /// Encrypts `plaintext`, returning a base64 blob of `nonce || ciphertext` suitable for
    /// storing directly in a JSON string field.
    pub fn seal(&self, plaintext: &str) -> Result<String, String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = GenericArray::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|err| format!("failed to seal secret: {err}"))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    pub fn open(&self, sealed: &str) -> Result<String, String> {
        let blob = BASE64
            .decode(sealed)
            .map_err(|err| format!("failed to decode sealed secret: {err}"))?;
        if blob.len() < NONCE_LEN {
            return Err("sealed secret too short to contain a nonce".to_owned());
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = GenericArray::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|err| format!("failed to open secret: {err}"))?;
        String::from_utf8(plaintext).map_err(|err| format!("sealed secret was not utf-8: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;

    use super::SecretBox;

    fn test_key() -> [u8; 64] {
        let mut key = [0u8; 64];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        key
    }

    #[test]
    fn roundtrips_secret() {
        let secret_box = SecretBox::new(&test_key()).unwrap();
        let sealed = secret_box.seal("s3-access-key-id").unwrap();
        assert_ne!(sealed, "s3-access-key-id");
        assert_eq!(secret_box.open(&sealed).unwrap(), "s3-access-key-id");
    }

    #[test]
    fn rejects_wrong_key_length() {
        assert!(SecretBox::new(&[0u8; 10]).is_err());
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let secret_box = SecretBox::new(&test_key()).unwrap();
        let mut sealed_bytes = base64::engine::general_purpose::STANDARD
            .decode(secret_box.seal("value").unwrap())
            .unwrap();
        *sealed_bytes.last_mut().unwrap() ^= 0xFF;
        let tampered = base64::engine::general_purpose::STANDARD.encode(sealed_bytes);
        assert!(secret_box.open(&tampered).is_err());
    }
}
