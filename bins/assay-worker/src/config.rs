// Sandbox language allow-list for the Assay worker
use anyhow::{bail, Context, Result};
use assay_common::config::{LanguageConfig, LanguagesFile};
use assay_common::types::Language;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Language configuration manager
#[derive(Debug, Clone)]
pub struct LanguageConfigManager {
    configs: BTreeMap<Language, LanguageConfig>,
}

impl LanguageConfigManager {
    /// Load language configurations from languages.json
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path).context("Failed to read languages.json")?;
        Self::from_json(&content)
    }

    /// Load with default path (config/languages.json), overridable via `LANGUAGES_CONFIG`
    pub fn load_default() -> Result<Self> {
        let path = std::env::var("LANGUAGES_CONFIG").unwrap_or_else(|_| "config/languages.json".to_string());
        Self::load(Path::new(&path))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let file = LanguagesFile::parse(content).context("Failed to parse languages.json")?;

        let mut configs = BTreeMap::new();
        for lang in file.languages {
            // parse() already rejected unknown names
            if let Some(language) = lang.language() {
                configs.insert(language, lang);
            }
        }

        Ok(Self { configs })
    }

    /// Get configuration for a specific language
    pub fn get_config(&self, language: Language) -> Result<&LanguageConfig> {
        self.configs
            .get(&language)
            .ok_or_else(|| anyhow::anyhow!("No configuration found for language: {}", language))
    }

    pub fn supports(&self, language: Language) -> bool {
        self.configs.contains_key(&language)
    }

    /// List all supported languages
    pub fn list_languages(&self) -> Vec<Language> {
        self.configs.keys().copied().collect()
    }
}
