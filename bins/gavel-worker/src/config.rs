// Language configuration management for the gavel worker
use anyhow::{bail, Context, Result};
use gavel_common::types::Language;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    pub name: String,
    pub image: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    /// Extra milliseconds granted on top of the base deadline. Slow cold
    /// starts (the JVM) get their allowance here instead of in code.
    #[serde(default)]
    pub deadline_extension_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    languages: Vec<LanguageConfig>,
}

/// Language configuration manager
#[derive(Clone)]
pub struct LanguageConfigManager {
    configs: HashMap<String, LanguageConfig>,
}

impl LanguageConfigManager {
    /// Load language configurations from languages.json
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Language config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path).context("Failed to read languages.json")?;

        let languages_json: LanguagesJson =
            serde_json::from_str(&content).context("Failed to parse languages.json")?;

        let mut configs = HashMap::new();
        for lang in languages_json.languages {
            configs.insert(lang.name.clone(), lang);
        }

        Ok(Self { configs })
    }

    /// Load with default path (config/languages.json)
    pub fn load_default() -> Result<Self> {
        let default_path = Path::new("config/languages.json");
        Self::load(default_path)
    }

    /// Build a manager straight from entries (used by tests).
    pub fn from_entries(entries: Vec<LanguageConfig>) -> Self {
        let mut configs = HashMap::new();
        for lang in entries {
            configs.insert(lang.name.clone(), lang);
        }
        Self { configs }
    }

    /// Get configuration for a specific language
    pub fn get_config(&self, language: Language) -> Result<&LanguageConfig> {
        let lang_name = language.to_string();
        self.configs
            .get(&lang_name)
            .ok_or_else(|| anyhow::anyhow!("No configuration found for language: {}", lang_name))
    }

    /// Get the sandbox image for a language
    pub fn get_image(&self, language: Language) -> Result<String> {
        Ok(self.get_config(language)?.image.clone())
    }

    /// Get memory limit for a language
    pub fn get_memory_limit_mb(&self, language: Language) -> Result<u32> {
        Ok(self.get_config(language)?.memory_limit_mb)
    }

    /// Get CPU limit for a language
    pub fn get_cpu_limit(&self, language: Language) -> Result<f32> {
        Ok(self.get_config(language)?.cpu_limit)
    }

    /// Per-language deadline extensions, keyed by language, for the race's
    /// deadline policy table.
    pub fn deadline_extensions(&self) -> HashMap<Language, u64> {
        self.configs
            .values()
            .filter_map(|cfg| {
                Language::parse(&cfg.name).map(|lang| (lang, cfg.deadline_extension_ms))
            })
            .filter(|(_, ext)| *ext > 0)
            .collect()
    }

    /// List all configured languages
    pub fn list_languages(&self) -> Vec<String> {
        self.configs.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, ext: u64) -> LanguageConfig {
        LanguageConfig {
            name: name.to_string(),
            image: format!("gavel-{}:latest", name),
            memory_limit_mb: 256,
            cpu_limit: 0.5,
            deadline_extension_ms: ext,
        }
    }

    #[test]
    fn test_lookup_by_language() {
        let manager = LanguageConfigManager::from_entries(vec![entry("python", 0), entry("java", 2000)]);

        assert_eq!(
            manager.get_image(Language::Python).unwrap(),
            "gavel-python:latest"
        );
        assert!(manager.get_config(Language::Cpp).is_err());
    }

    #[test]
    fn test_deadline_extensions_table() {
        let manager = LanguageConfigManager::from_entries(vec![
            entry("python", 0),
            entry("java", 2000),
            entry("cpp", 0),
        ]);

        let extensions = manager.deadline_extensions();
        assert_eq!(extensions.get(&Language::Java), Some(&2000));
        // Zero extensions stay out of the table entirely.
        assert!(!extensions.contains_key(&Language::Python));
        assert!(!extensions.contains_key(&Language::Cpp));
    }

    #[test]
    fn test_load_default_config() {
        // Only meaningful when run from the repo root where config/ lives.
        match LanguageConfigManager::load_default() {
            Ok(manager) => {
                assert!(manager.list_languages().contains(&"python".to_string()));
            }
            Err(e) => {
                println!("Config not found (expected outside repo root): {}", e);
            }
        }
    }
}
