use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::ExtraLanguage;
use crate::entity::TextDirection;

const EMBEDDED_LANGUAGES: &str = include_str!("../config/languages.json");

#[derive(Debug, Clone, Deserialize)]
struct LanguageEntry {
    name: String,
    #[serde(default)]
    dir: TextDirection,
}

/// Language codes captions may be written in, with autonyms and direction.
#[derive(Debug, Clone)]
pub struct LanguageCatalog {
    languages: BTreeMap<String, LanguageEntry>,
}

impl LanguageCatalog {
    pub fn embedded() -> Result<Self> {
        let languages: BTreeMap<String, LanguageEntry> =
            serde_json::from_str(EMBEDDED_LANGUAGES).context("failed to decode language table")?;
        Ok(Self { languages })
    }

    pub fn with_extra(mut self, extra: &[ExtraLanguage]) -> Self {
        for language in extra {
            let code = normalize_code(&language.code);
            if code.is_empty() {
                continue;
            }
            self.languages.insert(
                code,
                LanguageEntry {
                    name: language.name.clone(),
                    dir: language.dir,
                },
            );
        }
        self
    }

    pub fn is_known(&self, code: &str) -> bool {
        self.languages.contains_key(&normalize_code(code))
    }

    pub fn direction(&self, code: &str) -> TextDirection {
        self.languages
            .get(&normalize_code(code))
            .map(|entry| entry.dir)
            .unwrap_or_default()
    }

    pub fn name(&self, code: &str) -> Option<&str> {
        self.languages
            .get(&normalize_code(code))
            .map(|entry| entry.name.as_str())
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.languages.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.languages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }

    /// Every known language except `exclude`, always keeping `include`.
    pub fn available(&self, exclude: &[String], include: Option<&str>) -> Vec<String> {
        let include = include.map(normalize_code);
        self.languages
            .keys()
            .filter(|code| {
                include.as_deref() == Some(code.as_str())
                    || !exclude.iter().any(|item| normalize_code(item) == **code)
            })
            .cloned()
            .collect()
    }
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_lowercase()
}
