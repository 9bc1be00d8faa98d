//! Host key fingerprints
//!
//! Computes MD5, SHA-1 and SHA-256 fingerprints of a server's public key and
//! checks them against the fingerprint the endpoint advertises.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use md5::Md5;
use russh::keys::PublicKey;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Length of a colon-separated hex MD5 fingerprint (16 bytes)
pub const MD5_FINGERPRINT_LENGTH: usize = 47;

/// Length of a colon-separated hex SHA-1 fingerprint (20 bytes)
pub const SHA1_FINGERPRINT_LENGTH: usize = 59;

/// Length of an unpadded base64 SHA-256 fingerprint (32 bytes)
pub const SHA256_FINGERPRINT_LENGTH: usize = 43;

/// Fingerprint digest format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintFormat {
    Md5,
    Sha1,
    Sha256,
}

impl FingerprintFormat {
    /// Pick the format of an expected fingerprint from its length alone.
    ///
    /// The three lengths happen to be distinct; nothing else tells the formats
    /// apart, so a new format with a colliding length would be misread.
    pub fn detect(expected: &str) -> Option<Self> {
        match expected.len() {
            MD5_FINGERPRINT_LENGTH => Some(FingerprintFormat::Md5),
            SHA1_FINGERPRINT_LENGTH => Some(FingerprintFormat::Sha1),
            SHA256_FINGERPRINT_LENGTH => Some(FingerprintFormat::Sha256),
            _ => None,
        }
    }
}

/// Fingerprint a public key in the given format
pub fn fingerprint(key: &PublicKey, format: FingerprintFormat) -> Result<String> {
    let blob = key
        .to_bytes()
        .map_err(|e| Error::SshKey(format!("Failed to encode host key: {}", e)))?;

    Ok(match format {
        FingerprintFormat::Md5 => colon_hex(&Md5::digest(&blob)),
        FingerprintFormat::Sha1 => colon_hex(&Sha1::digest(&blob)),
        FingerprintFormat::Sha256 => STANDARD_NO_PAD.encode(Sha256::digest(&blob)),
    })
}

fn colon_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Trust decision for the server's host key
#[derive(Debug, Clone, Default)]
pub struct HostKeyPolicy {
    /// Fingerprint advertised for the endpoint; empty when none is on file
    pub expected_fingerprint: String,

    /// Accept any host key
    pub skip_validation: bool,
}

impl HostKeyPolicy {
    /// Create a policy that checks against `expected_fingerprint`
    pub fn new(expected_fingerprint: impl Into<String>, skip_validation: bool) -> Self {
        Self {
            expected_fingerprint: expected_fingerprint.into(),
            skip_validation,
        }
    }

    /// Decide whether to trust `key`
    ///
    /// Failures always carry the fingerprint that was actually received so the
    /// user can compare it or add it to their configuration.
    pub fn verify(&self, key: &PublicKey) -> Result<()> {
        if self.skip_validation {
            return Ok(());
        }

        let expected = self.expected_fingerprint.as_str();
        if expected.is_empty() {
            let received = fingerprint(key, FingerprintFormat::Md5)?;
            return Err(Error::UnknownHostKey(received));
        }

        let format = FingerprintFormat::detect(expected).ok_or(Error::UnsupportedFingerprint)?;
        let received = fingerprint(key, format)?;
        if received != expected {
            return Err(Error::HostKeyMismatch(received));
        }

        Ok(())
    }
}
