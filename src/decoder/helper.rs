//! Shared decoder logic
//!
//! Manifest resolution, asset remapping, checksum and verification
//! memoization are identical for the zip and directory decoders, so they
//! live in a composition helper that only needs the raw-file interface.

use crate::core::error::{HarborError, Result};
use crate::decoder::checksum::calculate_checksum;
use crate::decoder::manifest::{
    AgentStrategyDeclaration, AgentStrategyProviderDeclaration, EndpointDeclaration,
    EndpointProviderDeclaration, ModelDeclaration, ModelPosition, ModelProviderDeclaration,
    PluginDeclaration, ToolDeclaration, ToolProviderDeclaration, MODEL_POSITION_KEYS,
};
use crate::decoder::verify::{
    verify_plugin, verify_plugin_with_public_key_paths, ThirdPartyVerificationConfig,
};
use crate::decoder::PluginDecoder;
use crate::plugin::types::PluginUniqueIdentifier;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

fn readme_regex() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^README_([a-z]{2}_[A-Za-z]{2,})\.md$").expect("readme regex is valid")
    })
}

/// Memoizing helper shared by the concrete decoders
#[derive(Default, Debug)]
pub struct DecoderHelper {
    declaration: Mutex<Option<PluginDeclaration>>,
    checksum: Mutex<Option<String>>,
    verified: Mutex<Option<bool>>,
}

impl DecoderHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the manifest and every sub-declaration it references
    pub fn manifest(
        &self,
        decoder: &dyn PluginDecoder,
        verify_config: Option<&ThirdPartyVerificationConfig>,
    ) -> Result<PluginDeclaration> {
        if let Some(declaration) = self.declaration.lock().unwrap().as_ref() {
            return Ok(declaration.clone());
        }

        let manifest = decoder
            .read_file("manifest.yaml")
            .map_err(|e| HarborError::decode("manifest.yaml", e))?;

        let mut declaration: PluginDeclaration = serde_yaml::from_slice(&manifest)
            .map_err(|e| HarborError::decode("manifest.yaml", e))?;

        for tool_provider_file in declaration.plugins.tools.clone() {
            declaration.tool = Some(self.resolve_tool_provider(decoder, &tool_provider_file)?);
        }

        for endpoint_provider_file in declaration.plugins.endpoints.clone() {
            declaration.endpoint =
                Some(self.resolve_endpoint_provider(decoder, &endpoint_provider_file)?);
        }

        for model_provider_file in declaration.plugins.models.clone() {
            declaration.model = Some(self.resolve_model_provider(decoder, &model_provider_file)?);
        }

        for strategy_provider_file in declaration.plugins.agent_strategies.clone() {
            declaration.agent_strategy =
                Some(self.resolve_agent_strategy_provider(decoder, &strategy_provider_file)?);
        }

        declaration.fill_in_default_values();
        declaration.verified = self.verified(decoder, verify_config);

        *self.declaration.lock().unwrap() = Some(declaration.clone());
        Ok(declaration)
    }

    fn resolve_tool_provider(
        &self,
        decoder: &dyn PluginDecoder,
        provider_file: &str,
    ) -> Result<ToolProviderDeclaration> {
        let content = decoder
            .read_file(provider_file)
            .map_err(|e| HarborError::decode(provider_file, e))?;
        let mut provider: ToolProviderDeclaration = serde_yaml::from_slice(&content)
            .map_err(|e| HarborError::decode(provider_file, e))?;

        for tool_file in &provider.tool_files {
            let tool_content = decoder
                .read_file(tool_file)
                .map_err(|e| HarborError::decode(tool_file, e))?;
            let tool: ToolDeclaration = serde_yaml::from_slice(&tool_content)
                .map_err(|e| HarborError::decode(tool_file, e))?;
            provider.tools.push(tool);
        }

        Ok(provider)
    }

    fn resolve_endpoint_provider(
        &self,
        decoder: &dyn PluginDecoder,
        provider_file: &str,
    ) -> Result<EndpointProviderDeclaration> {
        let content = decoder
            .read_file(provider_file)
            .map_err(|e| HarborError::decode(provider_file, e))?;
        let mut provider: EndpointProviderDeclaration = serde_yaml::from_slice(&content)
            .map_err(|e| HarborError::decode(provider_file, e))?;

        for endpoint_file in &provider.endpoint_files {
            let endpoint_content = decoder
                .read_file(endpoint_file)
                .map_err(|e| HarborError::decode(endpoint_file, e))?;
            let endpoint: EndpointDeclaration = serde_yaml::from_slice(&endpoint_content)
                .map_err(|e| HarborError::decode(endpoint_file, e))?;
            provider.endpoints.push(endpoint);
        }

        Ok(provider)
    }

    fn resolve_model_provider(
        &self,
        decoder: &dyn PluginDecoder,
        provider_file: &str,
    ) -> Result<ModelProviderDeclaration> {
        let content = decoder
            .read_file(provider_file)
            .map_err(|e| HarborError::decode(provider_file, e))?;
        let mut provider: ModelProviderDeclaration = serde_yaml::from_slice(&content)
            .map_err(|e| HarborError::decode(provider_file, e))?;

        if let Some(position_files) = provider.position_files.clone() {
            let mut position = ModelPosition::default();
            for key in MODEL_POSITION_KEYS {
                let Some(position_file) = position_files.get(*key) else {
                    continue;
                };
                let position_content = decoder
                    .read_file(position_file)
                    .map_err(|e| HarborError::decode(position_file.as_str(), e))?;
                let entries: Vec<String> = serde_yaml::from_slice(&position_content)
                    .map_err(|e| HarborError::decode(position_file.as_str(), e))?;
                position.set(key, entries);
            }
            provider.position = Some(position);
        }

        let patterns = provider
            .model_files
            .iter()
            .map(|pattern| {
                glob::Pattern::new(pattern)
                    .map_err(|e| HarborError::decode(pattern.as_str(), e))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut models = Vec::new();
        decoder.walk(&mut |filename, dir| {
            let model_file = format!("{}{}", dir, filename);
            if model_file.ends_with("_position.yaml") {
                return Ok(());
            }

            for pattern in &patterns {
                if pattern.matches(&model_file) {
                    let model_content = decoder
                        .read_file(&model_file)
                        .map_err(|e| HarborError::decode(model_file.as_str(), e))?;
                    let model: ModelDeclaration = serde_yaml::from_slice(&model_content)
                        .map_err(|e| HarborError::decode(model_file.as_str(), e))?;
                    models.push(model);
                    break;
                }
            }

            Ok(())
        })?;
        provider.models = models;

        Ok(provider)
    }

    fn resolve_agent_strategy_provider(
        &self,
        decoder: &dyn PluginDecoder,
        provider_file: &str,
    ) -> Result<AgentStrategyProviderDeclaration> {
        let content = decoder
            .read_file(provider_file)
            .map_err(|e| HarborError::decode(provider_file, e))?;
        let mut provider: AgentStrategyProviderDeclaration = serde_yaml::from_slice(&content)
            .map_err(|e| HarborError::decode(provider_file, e))?;

        for strategy_file in &provider.strategy_files {
            let strategy_content = decoder
                .read_file(strategy_file)
                .map_err(|e| HarborError::decode(strategy_file, e))?;
            let strategy: AgentStrategyDeclaration = serde_yaml::from_slice(&strategy_content)
                .map_err(|e| HarborError::decode(strategy_file, e))?;
            provider.strategies.push(strategy);
        }

        Ok(provider)
    }

    /// Every file below `_assets/`, keyed by its name relative to that prefix
    pub fn assets(
        &self,
        decoder: &dyn PluginDecoder,
        separator: &str,
    ) -> Result<HashMap<String, Vec<u8>>> {
        let files = match decoder.read_dir("_assets") {
            Ok(files) => files,
            Err(HarborError::NotFound(_)) => return Ok(HashMap::new()),
            Err(e) => return Err(e),
        };

        let prefix = format!("_assets{}", separator);
        let mut assets = HashMap::new();
        for file in files {
            let content = decoder.read_file(&file)?;
            let name = file.strip_prefix(&prefix).unwrap_or(&file).to_string();
            assets.insert(name, content);
        }

        Ok(assets)
    }

    pub fn checksum(&self, decoder: &dyn PluginDecoder) -> Result<String> {
        if let Some(checksum) = self.checksum.lock().unwrap().as_ref() {
            return Ok(checksum.clone());
        }

        let checksum = calculate_checksum(decoder)?;
        *self.checksum.lock().unwrap() = Some(checksum.clone());
        Ok(checksum)
    }

    pub fn unique_identifier(
        &self,
        decoder: &dyn PluginDecoder,
        verify_config: Option<&ThirdPartyVerificationConfig>,
    ) -> Result<PluginUniqueIdentifier> {
        let manifest = self.manifest(decoder, verify_config)?;
        let checksum = self.checksum(decoder)?;
        PluginUniqueIdentifier::new(format!("{}@{}", manifest.identity(), checksum))
    }

    /// Every asset reference in the declaration must resolve to a decoded asset
    pub fn check_assets_valid(
        &self,
        decoder: &dyn PluginDecoder,
        verify_config: Option<&ThirdPartyVerificationConfig>,
        separator: &str,
    ) -> Result<()> {
        let declaration = self.manifest(decoder, verify_config)?;
        let assets = self.assets(decoder, separator)?;

        let check = |name: &str| -> Result<()> {
            if !name.is_empty() && !assets.contains_key(name) {
                return Err(HarborError::decode(
                    name,
                    "asset referenced by the manifest is missing from _assets",
                ));
            }
            Ok(())
        };

        check(&declaration.icon)?;
        check(&declaration.icon_dark)?;

        if let Some(tool) = &declaration.tool {
            check(&tool.identity.icon)?;
        }

        if let Some(model) = &declaration.model {
            for icons in [&model.icon_small, &model.icon_large].into_iter().flatten() {
                for icon in icons.values() {
                    check(icon)?;
                }
            }
        }

        Ok(())
    }

    /// Memoized verification state: `unknown -> verified | unverified`
    pub fn verified(
        &self,
        decoder: &dyn PluginDecoder,
        verify_config: Option<&ThirdPartyVerificationConfig>,
    ) -> bool {
        if let Some(verified) = *self.verified.lock().unwrap() {
            return verified;
        }

        let verified = match verify_config {
            Some(config) if config.enabled && !config.public_key_paths.is_empty() => {
                verify_plugin_with_public_key_paths(decoder, &config.public_key_paths).is_ok()
            }
            _ => verify_plugin(decoder).is_ok(),
        };

        *self.verified.lock().unwrap() = Some(verified);
        verified
    }

    /// Discover localized readmes.
    ///
    /// The root `README.md` is required and maps to `en_US`; every
    /// `readme/README_<locale>.md` contributes its locale. A missing
    /// `readme/` directory is not an error.
    pub fn available_i18n_readme(
        &self,
        decoder: &dyn PluginDecoder,
        separator: &str,
    ) -> Result<HashMap<String, String>> {
        let mut readmes = HashMap::new();

        let root_readme = decoder
            .read_file("README.md")
            .map_err(|e| HarborError::decode("README.md", format!("en_US readme not found: {}", e)))?;
        readmes.insert(
            "en_US".to_string(),
            String::from_utf8_lossy(&root_readme).into_owned(),
        );

        let files = match decoder.read_dir("readme") {
            Ok(files) => files,
            Err(HarborError::NotFound(_)) => return Ok(readmes),
            Err(e) => return Err(e),
        };

        let prefix = format!("readme{}", separator);
        for file in files {
            let name = file.strip_prefix(&prefix).unwrap_or(&file);
            let Some(captures) = readme_regex().captures(name) else {
                continue;
            };
            let locale = captures[1].to_string();
            let content = decoder
                .read_file(&file)
                .map_err(|e| HarborError::decode(file.as_str(), e))?;
            readmes.insert(locale, String::from_utf8_lossy(&content).into_owned());
        }

        Ok(readmes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readme_regex_matches_locales() {
        let re = readme_regex();
        assert_eq!(&re.captures("README_zh_Hans.md").unwrap()[1], "zh_Hans");
        assert_eq!(&re.captures("README_ja_JP.md").unwrap()[1], "ja_JP");
        assert!(re.captures("README.md").is_none());
        assert!(re.captures("README_EN_us.md").is_none());
        assert!(re.captures("README_z_Hans.md").is_none());
    }
}
