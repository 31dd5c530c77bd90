use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use toml::Value;

use crate::entity::{PropertyId, TextDirection};

pub const DEFAULT_USER_AGENT: &str = "mediainfo/0.1";
pub const DEFAULT_INTERFACE_LANGUAGE: &str = "en";
/// Wikibase `string-limits.multilang.length` default.
pub const DEFAULT_MAX_CAPTION_LENGTH: usize = 250;
pub const DEFAULT_WARN_WITHIN_MAX_CAPTION_LENGTH: usize = 20;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MediaInfoConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub captions: CaptionsSection,
    #[serde(default)]
    pub statements: StatementsSection,
    #[serde(default)]
    pub edit: EditSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub url: Option<String>,
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CaptionsSection {
    pub interface_language: Option<String>,
    #[serde(default)]
    pub fallback_languages: Vec<String>,
    #[serde(default)]
    pub user_languages: Vec<String>,
    pub max_caption_length: Option<usize>,
    pub warn_within_max_caption_length: Option<usize>,
    #[serde(default)]
    pub extra_languages: Vec<ExtraLanguage>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ExtraLanguage {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub dir: TextDirection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct StatementsSection {
    /// Properties shown even when the file has no values for them.
    #[serde(default)]
    pub default_properties: Vec<String>,
    /// Property id to datatype, e.g. `P180 = "wikibase-item"`.
    #[serde(default)]
    pub property_types: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct EditSection {
    pub summary: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub bot: Option<bool>,
}

fn env_override(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl MediaInfoConfig {
    /// Resolve the repo API URL: env > config > None.
    pub fn api_url_owned(&self) -> Option<String> {
        env_override("WIKI_API_URL").or_else(|| self.wiki.api_url.clone())
    }

    /// Resolve the wiki base URL: env WIKI_URL > config > derived from api_url.
    pub fn wiki_url(&self) -> Option<String> {
        if let Some(value) = env_override("WIKI_URL") {
            return Some(value);
        }
        if let Some(url) = &self.wiki.url {
            return Some(url.clone());
        }
        self.api_url_owned().and_then(|api| derive_wiki_url(&api))
    }

    pub fn user_agent(&self) -> String {
        env_override("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    pub fn interface_language(&self) -> String {
        env_override("MEDIAINFO_INTERFACE_LANGUAGE")
            .or_else(|| self.captions.interface_language.clone())
            .unwrap_or_else(|| DEFAULT_INTERFACE_LANGUAGE.to_string())
    }

    pub fn max_caption_length(&self) -> usize {
        self.captions
            .max_caption_length
            .unwrap_or(DEFAULT_MAX_CAPTION_LENGTH)
    }

    pub fn warn_within_max_caption_length(&self) -> usize {
        self.captions
            .warn_within_max_caption_length
            .unwrap_or(DEFAULT_WARN_WITHIN_MAX_CAPTION_LENGTH)
    }

    pub fn default_properties(&self) -> Result<Vec<PropertyId>> {
        self.statements
            .default_properties
            .iter()
            .map(|value| {
                PropertyId::parse(value).context("invalid [statements].default_properties entry")
            })
            .collect()
    }

    pub fn property_types(&self) -> Result<BTreeMap<PropertyId, String>> {
        let mut out = BTreeMap::new();
        for (key, datatype) in &self.statements.property_types {
            let property = PropertyId::parse(key)
                .with_context(|| format!("invalid [statements.property_types] key `{key}`"))?;
            out.insert(property, datatype.clone());
        }
        Ok(out)
    }

    pub fn bot_edits(&self) -> bool {
        self.edit.bot.unwrap_or(true)
    }
}

/// Load and parse the config TOML. Returns defaults if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MediaInfoConfig> {
    if !config_path.exists() {
        return Ok(MediaInfoConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MediaInfoConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[derive(Debug, Clone, Default)]
pub struct ConfigPatch {
    pub set_url: Option<String>,
    pub set_api_url: Option<String>,
    pub set_user_languages: Option<Vec<String>>,
}

/// Update selected keys while preserving every other section and key.
/// Returns `true` when a write occurred.
pub fn patch_config(config_path: &Path, patch: &ConfigPatch) -> Result<bool> {
    if patch.set_url.is_none() && patch.set_api_url.is_none() && patch.set_user_languages.is_none()
    {
        return Ok(false);
    }

    let mut root = if config_path.exists() {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        toml::from_str::<Value>(&content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?
    } else {
        Value::Table(Default::default())
    };
    let original = root.clone();

    let root_table = root.as_table_mut().ok_or_else(|| {
        anyhow::anyhow!(
            "top-level TOML must be a table in {}",
            config_path.display()
        )
    })?;

    if patch.set_url.is_some() || patch.set_api_url.is_some() {
        let wiki_table = section_mut(root_table, "wiki", config_path)?;
        if let Some(url) = &patch.set_url {
            wiki_table.insert("url".to_string(), Value::String(url.clone()));
        }
        if let Some(api_url) = &patch.set_api_url {
            wiki_table.insert("api_url".to_string(), Value::String(api_url.clone()));
        }
    }

    if let Some(languages) = &patch.set_user_languages {
        if languages.iter().any(|code| code.trim().is_empty()) {
            bail!("user language codes cannot be empty");
        }
        let captions_table = section_mut(root_table, "captions", config_path)?;
        captions_table.insert(
            "user_languages".to_string(),
            Value::Array(
                languages
                    .iter()
                    .map(|code| Value::String(code.trim().to_string()))
                    .collect(),
            ),
        );
    }

    if root == original {
        return Ok(false);
    }

    let parent = config_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", config_path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let rendered = toml::to_string_pretty(&root).context("failed to serialize config TOML")?;
    fs::write(config_path, rendered)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    Ok(true)
}

fn section_mut<'a>(
    root: &'a mut toml::map::Map<String, Value>,
    name: &str,
    config_path: &Path,
) -> Result<&'a mut toml::map::Map<String, Value>> {
    root.entry(name.to_string())
        .or_insert_with(|| Value::Table(Default::default()))
        .as_table_mut()
        .ok_or_else(|| anyhow::anyhow!("[{name}] must be a table in {}", config_path.display()))
}

/// Derive the wiki base URL from an API URL by stripping `/api.php` or `/w/api.php`.
pub fn derive_wiki_url(api_url: &str) -> Option<String> {
    let trimmed = api_url.trim();
    let stripped = trimmed
        .strip_suffix("/w/api.php")
        .or_else(|| trimmed.strip_suffix("/api.php"))
        .unwrap_or(trimmed);
    let result = stripped.trim_end_matches('/').to_string();
    if result.is_empty() {
        None
    } else {
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_apply_without_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert!(config.wiki.api_url.is_none());
        assert_eq!(config.max_caption_length(), 250);
        assert_eq!(config.warn_within_max_caption_length(), 20);
        assert!(config.bot_edits());
    }

    #[test]
    fn load_config_parses_all_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[wiki]
api_url = "https://commons.example.org/w/api.php"

[captions]
interface_language = "de"
fallback_languages = ["en"]
user_languages = ["de", "fr"]
max_caption_length = 120

[[captions.extra_languages]]
code = "smn"
name = "anarâškielâ"

[statements]
default_properties = ["P180"]

[statements.property_types]
P180 = "wikibase-item"
P1259 = "globe-coordinate"

[edit]
summary = "structured data sync"
tags = ["mediainfo-cli"]
bot = false
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert_eq!(config.max_caption_length(), 120);
        assert_eq!(config.captions.user_languages, vec!["de", "fr"]);
        assert_eq!(config.captions.extra_languages.len(), 1);
        assert_eq!(
            config.default_properties().expect("props")[0].to_string(),
            "P180"
        );
        let types = config.property_types().expect("types");
        assert_eq!(types.len(), 2);
        assert!(!config.bot_edits());
        assert_eq!(config.edit.tags, vec!["mediainfo-cli"]);
    }

    #[test]
    fn invalid_property_type_key_is_reported() {
        let mut config = MediaInfoConfig::default();
        config
            .statements
            .property_types
            .insert("Q5".to_string(), "string".to_string());
        let error = config.property_types().expect_err("must fail");
        assert!(error.to_string().contains("Q5"));
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[wiki\nurl = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn patch_config_preserves_other_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            "[statements]\ndefault_properties = [\"P180\"]\n",
        )
        .expect("write config");

        let wrote = patch_config(
            &config_path,
            &ConfigPatch {
                set_api_url: Some("https://commons.example.org/w/api.php".to_string()),
                set_user_languages: Some(vec!["en".to_string(), "nl".to_string()]),
                ..ConfigPatch::default()
            },
        )
        .expect("patch");
        assert!(wrote);

        let config = load_config(&config_path).expect("load config");
        assert_eq!(
            config.wiki.api_url.as_deref(),
            Some("https://commons.example.org/w/api.php")
        );
        assert_eq!(config.captions.user_languages, vec!["en", "nl"]);
        assert_eq!(config.statements.default_properties, vec!["P180"]);

        let again = patch_config(
            &config_path,
            &ConfigPatch {
                set_user_languages: Some(vec!["en".to_string(), "nl".to_string()]),
                ..ConfigPatch::default()
            },
        )
        .expect("patch");
        assert!(!again);
    }

    #[test]
    fn derive_wiki_url_strips_api_php() {
        assert_eq!(
            derive_wiki_url("https://commons.example.org/w/api.php"),
            Some("https://commons.example.org".to_string())
        );
        assert_eq!(
            derive_wiki_url("https://wiki.example.org/api.php"),
            Some("https://wiki.example.org".to_string())
        );
    }
}
