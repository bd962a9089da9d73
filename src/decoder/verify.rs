//! Package signature verification
//!
//! Packages are signed with ed25519 over `"<checksum>.<time>"`. A package
//! verifies either under the built-in trust root or, when a third-party
//! public-key bundle is configured, under one of the configured keys.

use crate::core::error::{HarborError, Result};
use crate::decoder::PluginDecoder;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Fixed in-archive path of the optional verification file
pub const VERIFICATION_FILE: &str = "_verification.json";

/// Built-in trust root public key
const BUILT_IN_PUBLIC_KEY: [u8; 32] = [
    0x58, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66,
    0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66, 0x66,
    0x66, 0x66,
];

/// Signed attestation shipped inside the package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    /// Who signed the package
    pub signer: String,
    /// Unix timestamp of the signing
    pub signed_at: i64,
}

impl Verification {
    /// Attestation used for packages verified under the built-in trust root
    /// that predate in-tree verification files
    pub fn built_in() -> Self {
        Self {
            signer: "harbor".to_string(),
            signed_at: 0,
        }
    }
}

/// Third-party signature verification settings
#[derive(Debug, Clone)]
pub struct ThirdPartyVerificationConfig {
    pub enabled: bool,
    pub public_key_paths: Vec<PathBuf>,
}

/// The byte string the package signature covers
pub fn signing_payload(checksum: &str, time: i64) -> Vec<u8> {
    format!("{}.{}", checksum, time).into_bytes()
}

/// Verify the package under the built-in trust root
pub fn verify_plugin(decoder: &dyn PluginDecoder) -> Result<()> {
    verify_with_keys(decoder, &[BUILT_IN_PUBLIC_KEY])
}

/// Verify the package under a configured public-key bundle
pub fn verify_plugin_with_public_key_paths(
    decoder: &dyn PluginDecoder,
    public_key_paths: &[PathBuf],
) -> Result<()> {
    let mut keys = Vec::with_capacity(public_key_paths.len());
    for path in public_key_paths {
        let encoded = std::fs::read_to_string(path).map_err(|e| {
            HarborError::VerificationError(format!(
                "failed to read public key {}: {}",
                path.display(),
                e
            ))
        })?;
        let bytes = BASE64_STANDARD.decode(encoded.trim()).map_err(|e| {
            HarborError::VerificationError(format!(
                "invalid public key encoding in {}: {}",
                path.display(),
                e
            ))
        })?;
        let key: [u8; 32] = bytes.try_into().map_err(|_| {
            HarborError::VerificationError(format!(
                "public key in {} must be 32 bytes",
                path.display()
            ))
        })?;
        keys.push(key);
    }

    verify_with_keys(decoder, &keys)
}

fn verify_with_keys(decoder: &dyn PluginDecoder, keys: &[[u8; 32]]) -> Result<()> {
    let signature_b64 = decoder.signature()?;
    if signature_b64.is_empty() {
        return Err(HarborError::VerificationError(
            "package is not signed".to_string(),
        ));
    }

    let signature_bytes = BASE64_STANDARD
        .decode(signature_b64)
        .map_err(|e| HarborError::VerificationError(format!("invalid signature encoding: {}", e)))?;
    let signature = Signature::from_slice(&signature_bytes)
        .map_err(|e| HarborError::VerificationError(format!("invalid signature: {}", e)))?;

    let time = decoder.create_time()?;
    let checksum = decoder.checksum()?;
    let payload = signing_payload(&checksum, time);

    for key in keys {
        let Ok(verifying_key) = VerifyingKey::from_bytes(key) else {
            continue;
        };
        if verifying_key.verify(&payload, &signature).is_ok() {
            return Ok(());
        }
    }

    Err(HarborError::VerificationError(
        "signature does not validate under any trusted key".to_string(),
    ))
}
