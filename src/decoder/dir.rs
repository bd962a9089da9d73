//! Filesystem package decoder over an extracted directory

use crate::core::error::{HarborError, Result};
use crate::decoder::helper::DecoderHelper;
use crate::decoder::manifest::PluginDeclaration;
use crate::decoder::PluginDecoder;
use crate::plugin::types::PluginUniqueIdentifier;
use std::collections::HashMap;
use std::path::{Path, PathBuf, MAIN_SEPARATOR_STR};
use walkdir::WalkDir;

/// Decoder over an extracted plugin directory
pub struct DirPluginDecoder {
    root: PathBuf,
    helper: DecoderHelper,
}

impl DirPluginDecoder {
    /// Decode an extracted package; validates the manifest before returning
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(HarborError::decode(
                root.display().to_string(),
                "plugin directory does not exist",
            ));
        }

        let decoder = Self {
            root,
            helper: DecoderHelper::new(),
        };

        decoder.manifest()?;

        Ok(decoder)
    }

    fn relative_name(&self, path: &Path) -> Option<String> {
        path.strip_prefix(&self.root)
            .ok()
            .map(|rel| rel.to_string_lossy().into_owned())
    }
}

impl PluginDecoder for DirPluginDecoder {
    fn read_file(&self, filename: &str) -> Result<Vec<u8>> {
        match std::fs::read(self.root.join(filename)) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(HarborError::NotFound(filename.to_string()))
            }
            Err(e) => Err(HarborError::decode(filename, e)),
        }
    }

    fn read_dir(&self, dirname: &str) -> Result<Vec<String>> {
        let dir = self.root.join(dirname);
        if !dir.is_dir() {
            return Err(HarborError::NotFound(dirname.to_string()));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&dir).follow_links(false) {
            let entry = entry.map_err(|e| HarborError::decode(dirname, e))?;
            if entry.file_type().is_file() {
                if let Some(name) = self.relative_name(entry.path()) {
                    files.push(name);
                }
            }
        }

        Ok(files)
    }

    fn walk(&self, f: &mut dyn FnMut(&str, &str) -> Result<()>) -> Result<()> {
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = entry.map_err(|e| HarborError::decode(self.root.display().to_string(), e))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(name) = self.relative_name(entry.path()) else {
                continue;
            };
            let (dir, filename) = match name.rfind(MAIN_SEPARATOR_STR) {
                Some(idx) => name.split_at(idx + 1),
                None => ("", name.as_str()),
            };
            f(filename, dir)?;
        }

        Ok(())
    }

    fn stat(&self, filename: &str) -> Result<u64> {
        match std::fs::metadata(self.root.join(filename)) {
            Ok(metadata) => Ok(metadata.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(HarborError::NotFound(filename.to_string()))
            }
            Err(e) => Err(HarborError::decode(filename, e)),
        }
    }

    fn separator(&self) -> &'static str {
        MAIN_SEPARATOR_STR
    }

    fn signature(&self) -> Result<String> {
        // extracted directories carry no archive metadata
        Ok(String::new())
    }

    fn create_time(&self) -> Result<i64> {
        Ok(0)
    }

    fn manifest(&self) -> Result<PluginDeclaration> {
        self.helper.manifest(self, None)
    }

    fn checksum(&self) -> Result<String> {
        self.helper.checksum(self)
    }

    fn unique_identifier(&self) -> Result<PluginUniqueIdentifier> {
        self.helper.unique_identifier(self, None)
    }

    fn assets(&self) -> Result<HashMap<String, Vec<u8>>> {
        self.helper.assets(self, self.separator())
    }

    fn available_i18n_readme(&self) -> Result<HashMap<String, String>> {
        self.helper.available_i18n_readme(self, self.separator())
    }

    fn verified(&self) -> bool {
        self.helper.verified(self, None)
    }

    fn check_assets_valid(&self) -> Result<()> {
        self.helper.check_assets_valid(self, None, self.separator())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
author: alice
name: calc
version: 1.0.0
icon: icon.svg
plugins:
  tools:
    - provider/calc.yaml
"#;

    const TOOL_PROVIDER: &str = r#"
identity:
  author: alice
  name: calc
  icon: icon.svg
tools:
  - tools/add.yaml
"#;

    const TOOL: &str = r#"
identity:
  name: add
"#;

    fn extract_package(dir: &TempDir) -> PathBuf {
        let root = dir.path().join("plugin");
        for (name, content) in [
            ("manifest.yaml", MANIFEST),
            ("README.md", "# calc"),
            ("provider/calc.yaml", TOOL_PROVIDER),
            ("tools/add.yaml", TOOL),
            ("_assets/icon.svg", "<svg/>"),
        ] {
            let path = root.join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
        root
    }

    #[test]
    fn test_decode_extracted_directory() {
        let dir = TempDir::new().unwrap();
        let decoder = DirPluginDecoder::new(extract_package(&dir)).unwrap();

        let manifest = decoder.manifest().unwrap();
        assert_eq!(manifest.identity(), "alice/calc:1.0.0");
        assert_eq!(manifest.tool.unwrap().tools.len(), 1);
    }

    #[test]
    fn test_missing_directory_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(DirPluginDecoder::new(dir.path().join("nope")).is_err());
    }

    #[test]
    fn test_assets_use_host_separator() {
        let dir = TempDir::new().unwrap();
        let decoder = DirPluginDecoder::new(extract_package(&dir)).unwrap();

        let assets = decoder.assets().unwrap();
        assert_eq!(assets.len(), 1);
        assert!(assets.contains_key("icon.svg"));
    }

    #[test]
    fn test_checksum_matches_between_runs() {
        let dir = TempDir::new().unwrap();
        let root = extract_package(&dir);

        let first = DirPluginDecoder::new(&root).unwrap().checksum().unwrap();
        let second = DirPluginDecoder::new(&root).unwrap().checksum().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unsigned_directory_is_unverified() {
        let dir = TempDir::new().unwrap();
        let decoder = DirPluginDecoder::new(extract_package(&dir)).unwrap();
        assert!(!decoder.verified());
    }

    #[test]
    fn test_readme_dir_missing_is_not_error() {
        let dir = TempDir::new().unwrap();
        let decoder = DirPluginDecoder::new(extract_package(&dir)).unwrap();
        let readmes = decoder.available_i18n_readme().unwrap();
        assert_eq!(readmes.len(), 1);
    }
}
