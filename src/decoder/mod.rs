//! Plugin package decoder
//!
//! A content-addressed reader over a plugin package. Two concrete sources
//! exist: an in-memory zip archive ([`zip::ZipPluginDecoder`]) and an
//! extracted directory ([`dir::DirPluginDecoder`]). Shared logic lives in
//! [`helper::DecoderHelper`], which only needs the raw-file portion of the
//! interface.

pub mod checksum;
pub mod dir;
pub mod helper;
pub mod manifest;
pub mod verify;
pub mod zip;

use crate::core::error::Result;
use crate::decoder::manifest::PluginDeclaration;
use crate::plugin::types::PluginUniqueIdentifier;
use std::collections::HashMap;

pub use dir::DirPluginDecoder;
pub use helper::DecoderHelper;
pub use verify::{ThirdPartyVerificationConfig, Verification, VERIFICATION_FILE};
pub use zip::ZipPluginDecoder;

/// Variant interface over a plugin package
pub trait PluginDecoder: Send + Sync {
    /// Read one file; `HarborError::NotFound` when the path does not exist
    fn read_file(&self, filename: &str) -> Result<Vec<u8>>;

    /// List every file below a directory, paths relative to the package root
    fn read_dir(&self, dirname: &str) -> Result<Vec<String>>;

    /// Visit every file as `(filename, dir)` where `dir` keeps its trailing separator
    fn walk(&self, f: &mut dyn FnMut(&str, &str) -> Result<()>) -> Result<()>;

    /// Uncompressed size of one file
    fn stat(&self, filename: &str) -> Result<u64>;

    /// Path separator used by this source
    fn separator(&self) -> &'static str;

    /// Base64 signature from the package metadata; empty when unsigned
    fn signature(&self) -> Result<String>;

    /// Signing timestamp from the package metadata
    fn create_time(&self) -> Result<i64>;

    /// Resolved, defaults-filled manifest aggregate (memoized)
    fn manifest(&self) -> Result<PluginDeclaration>;

    /// Canonical content checksum (memoized)
    fn checksum(&self) -> Result<String>;

    /// `<author>/<name>:<version>@<checksum>`
    fn unique_identifier(&self) -> Result<PluginUniqueIdentifier>;

    /// Files below `_assets/`, keyed relative to that prefix
    fn assets(&self) -> Result<HashMap<String, Vec<u8>>>;

    /// Locale -> readme text; `en_US` comes from the root `README.md`
    fn available_i18n_readme(&self) -> Result<HashMap<String, String>>;

    /// Whether the package signature validates (memoized)
    fn verified(&self) -> bool;

    /// Check that every asset the manifest references exists under `_assets/`
    fn check_assets_valid(&self) -> Result<()>;
}
