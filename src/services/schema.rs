//! Import schema registry
//!
//! Loaded once at startup from `config/imports.json` (embedded) or the file
//! named by `IMPORT_SCHEMA_PATH`, validated, and shared as `Arc<SchemaRegistry>`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use crate::services::dates;
use crate::types::{
    is_safe_identifier, EntityModel, FieldConfig, FieldSchema, FileSlotConfig, ImportTypeConfig,
    Rule, SchemaConfig, SchemaError,
};

const EMBEDDED_SCHEMA: &str = include_str!("../../config/imports.json");

#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    /// Keyed by `<import_type>.<slot>`
    schemas: BTreeMap<String, SchemaConfig>,
    /// Import type -> its slot keys, in config order
    types: BTreeMap<String, Vec<String>>,
    /// Import type -> display label
    labels: BTreeMap<String, String>,
}

impl SchemaRegistry {
    /// Load from `path`, or the embedded schema when `None`
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read schema file {}", path.display()))?;
                Self::from_json_str(&raw)
                    .with_context(|| format!("Invalid schema file {}", path.display()))
            }
            None => Self::from_json_str(EMBEDDED_SCHEMA).context("Invalid embedded schema"),
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, SchemaError> {
        let types: serde_json::Map<String, serde_json::Value> = serde_json::from_str(raw)?;

        let mut registry = Self {
            schemas: BTreeMap::new(),
            types: BTreeMap::new(),
            labels: BTreeMap::new(),
        };

        for (import_type, value) in types {
            let type_config: ImportTypeConfig = serde_json::from_value(value)?;
            if type_config.files.is_empty() {
                return Err(invalid(&import_type, "no file slots defined"));
            }

            let mut slot_keys = Vec::with_capacity(type_config.files.len());
            for (slot, slot_value) in type_config.files {
                let slot_config: FileSlotConfig = serde_json::from_value(slot_value)?;
                let schema = build_schema(
                    &import_type,
                    &slot,
                    type_config.permission_required.clone(),
                    slot_config,
                )?;
                debug!("Loaded import schema {} ({} fields)", schema.key, schema.fields.len());
                slot_keys.push(schema.key.clone());
                registry.schemas.insert(schema.key.clone(), schema);
            }
            registry.labels.insert(import_type.clone(), type_config.label);
            registry.types.insert(import_type, slot_keys);
        }

        // Surface conflicting column types across slots at load time
        registry.entity_models()?;

        Ok(registry)
    }

    /// Look up a schema by full key, or by bare import type when that type
    /// has exactly one file slot.
    pub fn resolve(&self, key: &str) -> Option<&SchemaConfig> {
        if let Some(schema) = self.schemas.get(key) {
            return Some(schema);
        }
        match self.types.get(key).map(Vec::as_slice) {
            Some([only]) => self.schemas.get(only),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SchemaConfig> {
        self.schemas.values()
    }

    /// Import types with their label and slot keys
    pub fn import_types(&self) -> impl Iterator<Item = (&str, &str, &[String])> {
        self.types.iter().map(|(k, v)| {
            let label = self.labels.get(k).map_or("", String::as_str);
            (k.as_str(), label, v.as_slice())
        })
    }

    /// One model per target table, with the union of columns every slot
    /// writing to that table declares.
    pub fn entity_models(&self) -> Result<Vec<EntityModel>, SchemaError> {
        let mut models: BTreeMap<String, EntityModel> = BTreeMap::new();

        for schema in self.schemas.values() {
            let model = models
                .entry(schema.target.table.clone())
                .or_insert_with(|| EntityModel {
                    target: schema.target.clone(),
                    columns: Vec::new(),
                });

            if model.target != schema.target {
                return Err(invalid(
                    &schema.key,
                    format!("target for table '{}' differs from another slot", schema.target.table),
                ));
            }

            for field in &schema.fields {
                match model.column_type(&field.key) {
                    Some(existing) if existing != field.field_type => {
                        return Err(invalid(
                            &schema.key,
                            format!("column '{}' declared with conflicting types", field.key),
                        ));
                    }
                    Some(_) => {}
                    None => model.columns.push((field.key.clone(), field.field_type)),
                }
            }
        }

        Ok(models.into_values().collect())
    }
}

fn build_schema(
    import_type: &str,
    slot: &str,
    permission: Option<String>,
    config: FileSlotConfig,
) -> Result<SchemaConfig, SchemaError> {
    let key = format!("{}.{}", import_type, slot);

    for identifier in [
        &config.target.table,
        &config.target.link_table,
        &config.target.link_column,
    ] {
        if !is_safe_identifier(identifier) {
            return Err(SchemaError::InvalidIdentifier(identifier.clone()));
        }
    }

    if config.headers_to_db.is_empty() {
        return Err(invalid(&key, "headers_to_db is empty"));
    }

    let mut fields = Vec::with_capacity(config.headers_to_db.len());
    for (field_key, value) in config.headers_to_db {
        if !is_safe_identifier(&field_key) {
            return Err(SchemaError::InvalidIdentifier(field_key));
        }

        let field: FieldConfig = serde_json::from_value(value)?;
        let rules = field
            .validation
            .iter()
            .map(|raw| raw.parse::<Rule>())
            .collect::<Result<Vec<_>, _>>()?;

        for rule in &rules {
            if let Rule::DateFormat(format) = rule {
                if dates::php_to_chrono(format).is_none() {
                    return Err(SchemaError::InvalidDateFormat(format.clone()));
                }
            }
        }

        fields.push(FieldSchema {
            key: field_key,
            label: field.label,
            field_type: field.field_type,
            rules,
        });
    }

    if config.update_or_create.is_empty() {
        return Err(invalid(&key, "update_or_create is empty"));
    }
    for match_key in &config.update_or_create {
        if !fields.iter().any(|f| &f.key == match_key) {
            return Err(invalid(
                &key,
                format!("match key '{}' is not a configured field", match_key),
            ));
        }
    }

    Ok(SchemaConfig {
        key,
        import_type: import_type.to_string(),
        slot: slot.to_string(),
        label: config.label,
        permission,
        fields,
        match_keys: config.update_or_create,
        target: config.target,
    })
}

fn invalid(schema: &str, message: impl Into<String>) -> SchemaError {
    SchemaError::Invalid {
        schema: schema.to_string(),
        message: message.into(),
    }
}
