//! Canonical package checksum
//!
//! The checksum is a digest of the uncompressed contents, independent of
//! archive entry ordering: file names are sorted lexicographically and each
//! contributes `len(name) || name || len(data) || data` to a running SHA-256.
//! `_assets` is included; signature metadata is not.

use crate::core::error::Result;
use crate::decoder::verify::VERIFICATION_FILE;
use crate::decoder::PluginDecoder;
use sha2::{Digest, Sha256};

/// Compute the canonical checksum over every file the decoder exposes
pub fn calculate_checksum(decoder: &dyn PluginDecoder) -> Result<String> {
    let mut names = Vec::new();
    decoder.walk(&mut |filename, dir| {
        names.push(format!("{}{}", dir, filename));
        Ok(())
    })?;
    names.sort();

    let mut hasher = Sha256::new();
    for name in names {
        if name == VERIFICATION_FILE {
            continue;
        }
        let data = decoder.read_file(&name)?;
        hasher.update((name.len() as u64).to_be_bytes());
        hasher.update(name.as_bytes());
        hasher.update((data.len() as u64).to_be_bytes());
        hasher.update(&data);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
