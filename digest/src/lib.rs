// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest as Sha2Digest, Sha256};

// See the [`hashing` crate](https://github.com/pantsbuild/pants/blob/master/src/rust/engine/hashing/src/lib.rs)
// for the inspiration for this module.

const HASH_SIZE_BYTES: usize = 32;

const EMPTY_HASH_BYTES: [u8; HASH_SIZE_BYTES] = [
    0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f, 0xb9, 0x24,
    0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b, 0x78, 0x52, 0xb8, 0x55,
];

/// Content address of a byte range: a SHA-256 hash paired with the length it was computed over.
/// Used as the ETag basis and the content-addressed cache key throughout the storage engine.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Digest {
    pub hash: [u8; HASH_SIZE_BYTES],
    pub size_bytes: usize,
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest<{}, {}>", hex::encode(self.hash), self.size_bytes)
    }
}

impl Digest {
    pub const EMPTY: Self = Self {
        hash: EMPTY_HASH_BYTES,
        size_bytes: 0,
    };

    pub fn new(hash_str: &str, size_bytes: usize) -> Result<Self, String> {
        let hash =
            hex::decode(hash_str).map_err(|err| format!("Failed to convert digest: {err}"))?;
        Self::from_slice(&hash, size_bytes)
    }

    pub fn from_slice(hash: &[u8], size_bytes: usize) -> Result<Self, String> {
        if hash.len() != HASH_SIZE_BYTES {
            return Err(format!("Digest had unexpected length {}", hash.len()));
        }
        let mut digest = Digest {
            hash: [0; HASH_SIZE_BYTES],
            size_bytes,
        };
        digest.hash.clone_from_slice(hash);
        Ok(digest)
    }

    pub fn of_bytes(content: &Bytes) -> Self {
        let mut hasher = Sha256::default();
        hasher.update(&content[..]);
        let hash = hasher.finalize();
        let mut digest = Digest {
            hash: [0; HASH_SIZE_BYTES],
            size_bytes: content.len(),
        };
        digest.hash.clone_from_slice(hash.as_slice());
        digest
    }

    /// Hash a byte range as it is produced, for streaming writes where the full buffer is
    /// never materialized at once.
    pub fn hasher() -> DigestHasher {
        DigestHasher {
            hasher: Sha256::default(),
            size_bytes: 0,
        }
    }

    pub fn hex(&self) -> String {
        hex::encode(self.hash)
    }

    /// The strong-validator ETag form used by the range streaming service: a quoted hex digest.
    pub fn etag(&self) -> String {
        format!("\"{}\"", self.hex())
    }
}

pub struct DigestHasher {
    hasher: Sha256,
    size_bytes: usize,
}

impl DigestHasher {
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.size_bytes += chunk.len();
    }

    pub fn finish(self) -> Digest {
        let hash = self.hasher.finalize();
        let mut digest = Digest {
            hash: [0; HASH_SIZE_BYTES],
            size_bytes: self.size_bytes,
        };
        digest.hash.clone_from_slice(hash.as_slice());
        digest
    }
}

#[cfg(test)]
mod tests {
    use std::fmt::Write;

    use bytes::BytesMut;

    use super::Digest;

    #[test]
    fn hash_bytes() {
        let content = {
            let mut buf = BytesMut::new();
            buf.write_str("foobar").unwrap();
            buf.freeze()
        };
        let actual_digest = Digest::of_bytes(&content);
        let expected_digest = Digest::new(
            "c3ab8ff13720e8ad9047dd39466b3c8974e592c2fa383d4a3960714caef0c4f2",
            content.len(),
        )
        .unwrap();
        assert_eq!(actual_digest, expected_digest);
    }

    #[test]
    fn streaming_hasher_matches_of_bytes() {
        let content = Digest::of_bytes(&bytes::Bytes::from_static(b"hello world"));
        let mut hasher = Digest::hasher();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finish(), content);
    }

    #[test]
    fn etag_is_quoted_hex() {
        assert_eq!(Digest::EMPTY.etag(), format!("\"{}\"", Digest::EMPTY.hex()));
    }

    #[test]
    fn rejects_wrong_length_hash() {
        assert!(Digest::new("abcd", 0).is_err());
    }
}
