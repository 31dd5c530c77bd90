use std::collections::HashMap;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::debug;

use crate::api::{RepoReadApi, ValueFormat};
use crate::entity::DataValue;

/// Memoizes `wbformatvalue` results for the lifetime of a command.
#[derive(Debug, Default)]
pub struct FormatValueCache {
    entries: HashMap<String, String>,
    hits: usize,
}

impl FormatValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key under which a formatted value is cached. Object keys are sorted, so
    /// values that differ only in key order share an entry.
    pub fn cache_key(value: &DataValue, format: ValueFormat, language: &str) -> Result<String> {
        let data = serde_json::to_value(value).context("failed to encode datavalue")?;
        let key = serde_json::json!({
            "data": data,
            "format": format.as_str(),
            "language": language,
        });
        Ok(canonical_json(&key))
    }

    pub fn format<A: RepoReadApi + ?Sized>(
        &mut self,
        api: &mut A,
        value: &DataValue,
        format: ValueFormat,
        language: &str,
    ) -> Result<String> {
        let key = Self::cache_key(value, format, language)?;
        if let Some(result) = self.entries.get(&key) {
            self.hits += 1;
            return Ok(result.clone());
        }
        debug!(value_type = value.value_type(), format = format.as_str(), "formatting value");
        // Failures propagate without touching the cache so the next call retries.
        let result = api.format_value(value, format, language)?;
        self.entries.insert(key, result.clone());
        Ok(result)
    }

    /// Formats `value`, falling back to its plain rendering when the API fails.
    pub fn format_or_plain<A: RepoReadApi + ?Sized>(
        &mut self,
        api: &mut A,
        value: &DataValue,
        language: &str,
    ) -> String {
        match self.format(api, value, ValueFormat::PlainText, language) {
            Ok(text) => text,
            Err(error) => {
                debug!(error = %format!("{error:#}"), "format fallback");
                value.plain_text()
            }
        }
    }

    pub fn contains(&self, value: &DataValue, format: ValueFormat, language: &str) -> bool {
        Self::cache_key(value, format, language)
            .map(|key| self.entries.contains_key(&key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }
}

fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|key| {
                    format!(
                        "{}:{}",
                        Value::String(key.clone()),
                        canonical_json(&map[key.as_str()])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}
