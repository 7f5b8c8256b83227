//! Header normalization: raw spreadsheet headers -> canonical field keys

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::error::ImportError;
use crate::types::SchemaConfig;

/// Headers that snake-casing would get wrong
static KNOWN_HEADERS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("SKU", "sku"),
        ("SO#", "so_num"),
        ("SO #", "so_num"),
        ("SO No", "so_num"),
        ("Item ID", "item_id"),
        ("Client ID", "client_id"),
        ("Sale ID", "sale_id"),
        ("E-mail", "email"),
    ])
});

#[derive(Debug, Clone, Default)]
pub struct ColumnNormalizer {
    labels: HashMap<String, String>,
}

impl ColumnNormalizer {
    /// Normalizer that also maps each field's configured label to its key
    pub fn for_schema(schema: &SchemaConfig) -> Self {
        let labels = schema
            .fields
            .iter()
            .map(|f| (f.label.trim().to_string(), f.key.clone()))
            .collect();
        Self { labels }
    }

    /// Canonical keys for `raw_headers`, in the same order
    pub fn normalize(&self, raw_headers: &[String]) -> Vec<String> {
        raw_headers
            .iter()
            .enumerate()
            .map(|(idx, raw)| {
                let raw = if idx == 0 {
                    raw.trim_start_matches('\u{feff}')
                } else {
                    raw.as_str()
                };
                self.normalize_one(raw)
            })
            .collect()
    }

    fn normalize_one(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        if let Some(key) = KNOWN_HEADERS.get(trimmed) {
            return (*key).to_string();
        }
        if let Some(key) = self.labels.get(trimmed) {
            return key.clone();
        }
        snake_case(trimmed)
    }
}

/// Trim, lowercase, and collapse whitespace and `-./` runs into one `_`
pub fn snake_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_separator = false;

    for c in raw.trim().chars() {
        if c.is_whitespace() || matches!(c, '-' | '.' | '/') {
            pending_separator = true;
            continue;
        }
        if pending_separator && !out.is_empty() {
            out.push('_');
        }
        pending_separator = false;
        out.extend(c.to_lowercase());
    }

    out
}

/// Fails with the first schema field, in schema order, absent from `headers`
pub fn check_required_headers(schema: &SchemaConfig, headers: &[String]) -> Result<(), ImportError> {
    match schema
        .required_fields()
        .find(|key| !headers.iter().any(|h| h == key))
    {
        Some(missing) => Err(ImportError::MissingHeader(missing.to_string())),
        None => Ok(()),
    }
}
