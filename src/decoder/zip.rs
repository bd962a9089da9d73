//! Zip-archive package decoder

use crate::core::error::{HarborError, Result};
use crate::decoder::helper::DecoderHelper;
use crate::decoder::manifest::PluginDeclaration;
use crate::decoder::verify::{ThirdPartyVerificationConfig, Verification, VERIFICATION_FILE};
use crate::decoder::PluginDecoder;
use crate::plugin::types::PluginUniqueIdentifier;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Mutex;
use zip::ZipArchive;

/// Signature metadata embedded in the archive comment
#[derive(Debug, Clone, Deserialize)]
struct ArchiveComment {
    #[serde(default)]
    signature: String,
    #[serde(default)]
    time: i64,
}

/// Decoder over an in-memory zip archive
#[derive(Debug)]
pub struct ZipPluginDecoder {
    archive: Mutex<ZipArchive<Cursor<Vec<u8>>>>,
    /// File entries, directory placeholders excluded
    entries: Vec<String>,
    comment: String,
    signature_data: Mutex<Option<(String, i64)>>,
    third_party: Option<ThirdPartyVerificationConfig>,
    helper: DecoderHelper,
}

impl ZipPluginDecoder {
    /// Decode a package; validates the manifest before returning
    pub fn new(binary: Vec<u8>) -> Result<Self> {
        Self::open(binary, None)
    }

    /// Decode a package, verifying the signature under a third-party key bundle
    pub fn new_with_verification_config(
        binary: Vec<u8>,
        config: ThirdPartyVerificationConfig,
    ) -> Result<Self> {
        Self::open(binary, Some(config))
    }

    /// Decode a package, rejecting archives whose total uncompressed size
    /// exceeds `max_size` before any other work
    pub fn new_with_size_limit(binary: Vec<u8>, max_size: u64) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(binary))
            .map_err(|e| HarborError::decode("package", e))?;

        let mut total: u64 = 0;
        for i in 0..archive.len() {
            let entry = archive
                .by_index_raw(i)
                .map_err(|e| HarborError::decode("package", e))?;
            total += entry.size();
            if total > max_size {
                return Err(HarborError::decode(
                    "package",
                    format!(
                        "plugin package size is too large, please ensure the uncompressed size is less than {} bytes",
                        max_size
                    ),
                ));
            }
        }

        Self::open(archive.into_inner().into_inner(), None)
    }

    fn open(binary: Vec<u8>, third_party: Option<ThirdPartyVerificationConfig>) -> Result<Self> {
        let archive = ZipArchive::new(Cursor::new(binary))
            .map_err(|e| HarborError::decode("package", e))?;

        let entries: Vec<String> = archive
            .file_names()
            .filter(|name| !name.ends_with('/'))
            .map(String::from)
            .collect();
        let comment = String::from_utf8_lossy(archive.comment()).into_owned();

        let decoder = Self {
            archive: Mutex::new(archive),
            entries,
            comment,
            signature_data: Mutex::new(None),
            third_party,
            helper: DecoderHelper::new(),
        };

        // a package without a resolvable manifest is not a plugin
        decoder.manifest()?;

        Ok(decoder)
    }

    fn decode_signature(&self) -> Result<(String, i64)> {
        if let Some(data) = self.signature_data.lock().unwrap().as_ref() {
            return Ok(data.clone());
        }

        let parsed: ArchiveComment = serde_json::from_str(&self.comment)
            .map_err(|e| HarborError::decode("archive comment", e))?;

        let data = (parsed.signature, parsed.time);
        *self.signature_data.lock().unwrap() = Some(data.clone());
        Ok(data)
    }

    /// Signed attestation from the in-tree verification file.
    ///
    /// Errors when the package is not verified. Returns `None` for verified
    /// packages that predate verification files (signed by the trust root).
    pub fn verification(&self) -> Result<Option<Verification>> {
        if !self.verified() {
            return Err(HarborError::VerificationError(
                "plugin is not verified".to_string(),
            ));
        }

        match self.read_file(VERIFICATION_FILE) {
            Ok(content) => {
                let verification: Verification = serde_json::from_slice(&content)
                    .map_err(|e| HarborError::decode(VERIFICATION_FILE, e))?;
                Ok(Some(verification))
            }
            Err(HarborError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Extract the archive into `dst`; removes `dst` again on failure
    pub fn extract_to(&self, dst: &Path) -> Result<()> {
        let result = self.walk(&mut |filename, dir| {
            let target_dir = dst.join(dir);
            std::fs::create_dir_all(&target_dir)?;

            let content = self.read_file(&format!("{}{}", dir, filename))?;
            std::fs::write(target_dir.join(filename), content)?;
            Ok(())
        });

        if let Err(e) = result {
            let _ = std::fs::remove_dir_all(dst);
            return Err(HarborError::decode(
                dst.display().to_string(),
                format!("failed to copy plugin to working directory: {}", e),
            ));
        }

        Ok(())
    }
}

impl PluginDecoder for ZipPluginDecoder {
    fn read_file(&self, filename: &str) -> Result<Vec<u8>> {
        let mut archive = self.archive.lock().unwrap();
        let mut file = match archive.by_name(filename) {
            Ok(file) => file,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(HarborError::NotFound(filename.to_string()))
            }
            Err(e) => return Err(HarborError::decode(filename, e)),
        };

        let mut content = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut content)
            .map_err(|e| HarborError::decode(filename, e))?;
        Ok(content)
    }

    fn read_dir(&self, dirname: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", dirname.trim_end_matches('/'));
        Ok(self
            .entries
            .iter()
            .filter(|name| name.starts_with(&prefix))
            .cloned()
            .collect())
    }

    fn walk(&self, f: &mut dyn FnMut(&str, &str) -> Result<()>) -> Result<()> {
        for entry in &self.entries {
            let (dir, filename) = match entry.rfind('/') {
                Some(idx) => entry.split_at(idx + 1),
                None => ("", entry.as_str()),
            };
            f(filename, dir)?;
        }
        Ok(())
    }

    fn stat(&self, filename: &str) -> Result<u64> {
        let mut archive = self.archive.lock().unwrap();
        let file = match archive.by_name(filename) {
            Ok(file) => file,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(HarborError::NotFound(filename.to_string()))
            }
            Err(e) => return Err(HarborError::decode(filename, e)),
        };
        Ok(file.size())
    }

    fn separator(&self) -> &'static str {
        // zip archives are os-independent, `/` is the separator
        "/"
    }

    fn signature(&self) -> Result<String> {
        Ok(self.decode_signature()?.0)
    }

    fn create_time(&self) -> Result<i64> {
        Ok(self.decode_signature()?.1)
    }

    fn manifest(&self) -> Result<PluginDeclaration> {
        self.helper.manifest(self, self.third_party.as_ref())
    }

    fn checksum(&self) -> Result<String> {
        self.helper.checksum(self)
    }

    fn unique_identifier(&self) -> Result<PluginUniqueIdentifier> {
        self.helper.unique_identifier(self, self.third_party.as_ref())
    }

    fn assets(&self) -> Result<HashMap<String, Vec<u8>>> {
        self.helper.assets(self, self.separator())
    }

    fn available_i18n_readme(&self) -> Result<HashMap<String, String>> {
        self.helper.available_i18n_readme(self, self.separator())
    }

    fn verified(&self) -> bool {
        self.helper.verified(self, self.third_party.as_ref())
    }

    fn check_assets_valid(&self) -> Result<()> {
        self.helper
            .check_assets_valid(self, self.third_party.as_ref(), self.separator())
    }
}
