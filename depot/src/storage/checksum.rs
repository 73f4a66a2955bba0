//! Digest bookkeeping for stored artifacts.
//!
//! Every configured algorithm maps to a checksum sibling kept next to the
//! artifact (`foo.jar` -> `foo.jar.sha1`) holding the lowercase hex digest.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    #[serde(rename = "MD5")]
    Md5,
    #[serde(rename = "SHA-1", alias = "SHA1")]
    Sha1,
    #[serde(rename = "SHA-256", alias = "SHA256")]
    Sha256,
    #[serde(rename = "SHA-512", alias = "SHA512")]
    Sha512,
}

impl DigestAlgorithm {
    pub const ALL: [DigestAlgorithm; 4] = [
        DigestAlgorithm::Md5,
        DigestAlgorithm::Sha1,
        DigestAlgorithm::Sha256,
        DigestAlgorithm::Sha512,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "MD5",
            DigestAlgorithm::Sha1 => "SHA-1",
            DigestAlgorithm::Sha256 => "SHA-256",
            DigestAlgorithm::Sha512 => "SHA-512",
        }
    }

    /// File extension of the checksum sibling, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            DigestAlgorithm::Md5 => "md5",
            DigestAlgorithm::Sha1 => "sha1",
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }

    pub fn from_extension(ext: &str) -> Option<DigestAlgorithm> {
        Self::ALL.into_iter().find(|algo| algo.extension() == ext)
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "");
        match normalized.as_str() {
            "MD5" => Ok(DigestAlgorithm::Md5),
            "SHA1" => Ok(DigestAlgorithm::Sha1),
            "SHA256" => Ok(DigestAlgorithm::Sha256),
            "SHA512" => Ok(DigestAlgorithm::Sha512),
            _ => Err(format!("unsupported digest algorithm `{s}`")),
        }
    }
}

enum Hasher {
    Md5(md5::Context),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Md5 => Hasher::Md5(md5::Context::new()),
            DigestAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            DigestAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            DigestAlgorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(ctx) => ctx.consume(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    fn finish(self) -> String {
        match self {
            Hasher::Md5(ctx) => format!("{:x}", ctx.compute()),
            Hasher::Sha1(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Incrementally digests a byte stream with several algorithms at once.
pub struct DigestSet {
    hashers: Vec<(DigestAlgorithm, Hasher)>,
}

impl DigestSet {
    pub fn new(algorithms: &[DigestAlgorithm]) -> Self {
        let mut hashers: Vec<(DigestAlgorithm, Hasher)> = Vec::with_capacity(algorithms.len());
        for algo in algorithms {
            if hashers.iter().all(|(existing, _)| existing != algo) {
                hashers.push((*algo, Hasher::new(*algo)));
            }
        }
        DigestSet { hashers }
    }

    pub fn update(&mut self, data: &[u8]) {
        for (_, hasher) in self.hashers.iter_mut() {
            hasher.update(data);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hashers.is_empty()
    }

    pub fn finish(self) -> BTreeMap<DigestAlgorithm, String> {
        self.hashers
            .into_iter()
            .map(|(algo, hasher)| (algo, hasher.finish()))
            .collect()
    }
}

pub fn digest_hex(algorithm: DigestAlgorithm, data: &[u8]) -> String {
    let mut hasher = Hasher::new(algorithm);
    hasher.update(data);
    hasher.finish()
}

/// Extracts the digest from a checksum file body. Some tools append the file
/// name after the hash (`<hex>  foo.jar`).
pub fn parse_checksum_file(body: &str) -> Option<String> {
    body.split_whitespace()
        .next()
        .map(|token| token.to_ascii_lowercase())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChecksumStatus {
    Match,
    Mismatch { expected: String, actual: String },
    Missing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_digests_of_empty_input() {
        assert_eq!(
            digest_hex(DigestAlgorithm::Md5, b""),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        assert_eq!(
            digest_hex(DigestAlgorithm::Sha1, b""),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
        assert_eq!(
            digest_hex(DigestAlgorithm::Sha256, b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn incremental_digest_matches_one_shot() {
        let mut set = DigestSet::new(&[DigestAlgorithm::Sha1, DigestAlgorithm::Md5]);
        set.update(b"hello ");
        set.update(b"world");
        let digests = set.finish();
        assert_eq!(digests.len(), 2);
        assert_eq!(
            digests[&DigestAlgorithm::Sha1],
            digest_hex(DigestAlgorithm::Sha1, b"hello world")
        );
        assert_eq!(
            digests[&DigestAlgorithm::Md5],
            digest_hex(DigestAlgorithm::Md5, b"hello world")
        );
    }

    #[test]
    fn algorithm_names_parse() {
        assert_eq!("SHA-1".parse::<DigestAlgorithm>(), Ok(DigestAlgorithm::Sha1));
        assert_eq!("sha256".parse::<DigestAlgorithm>(), Ok(DigestAlgorithm::Sha256));
        assert_eq!("md5".parse::<DigestAlgorithm>(), Ok(DigestAlgorithm::Md5));
        assert!("crc32".parse::<DigestAlgorithm>().is_err());
        assert_eq!(
            DigestAlgorithm::from_extension("sha512"),
            Some(DigestAlgorithm::Sha512)
        );
    }

    #[test]
    fn checksum_body_with_file_name() {
        assert_eq!(
            parse_checksum_file("ABCDEF  foo.jar\n"),
            Some("abcdef".to_string())
        );
        assert_eq!(parse_checksum_file("   \n"), None);
    }
}
