//! Import schema types
//!
//! The raw `*Config` structs mirror the JSON file (`config/imports.json`);
//! [`SchemaConfig`] is the validated, typed form handed to the pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// RAW CONFIG (as stored on disk)
// =============================================================================

/// One import type, e.g. `orders` or `clients_and_sales`
#[derive(Debug, Clone, Deserialize)]
pub struct ImportTypeConfig {
    pub label: String,
    #[serde(default)]
    pub permission_required: Option<String>,
    /// File slot name -> definition. Ordered as written.
    pub files: serde_json::Map<String, serde_json::Value>,
}

/// One file slot inside an import type
#[derive(Debug, Clone, Deserialize)]
pub struct FileSlotConfig {
    pub label: String,
    pub target: TargetModel,
    /// Canonical field key -> definition. Ordered as written.
    pub headers_to_db: serde_json::Map<String, serde_json::Value>,
    pub update_or_create: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldConfig {
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub validation: Vec<String>,
}

// =============================================================================
// TYPED SCHEMA
// =============================================================================

/// Declared storage type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Date,
    Double,
    Integer,
}

impl FieldType {
    pub fn is_numeric(self) -> bool {
        matches!(self, FieldType::Double | FieldType::Integer)
    }

    /// PostgreSQL cast applied to text parameters bound for this field
    pub fn sql_cast(self) -> &'static str {
        match self {
            FieldType::String => "text",
            FieldType::Date => "date",
            FieldType::Double => "double precision",
            FieldType::Integer => "bigint",
        }
    }
}

/// Table an import slot writes to, plus the actor link table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetModel {
    pub table: String,
    /// Entity name recorded in audit entries (`Order`, `Item`, ...)
    pub entity: String,
    pub link_table: String,
    pub link_column: String,
}

/// A single validation rule parsed from its configuration string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Required,
    Nullable,
    /// PHP-style format string, e.g. `d.m.Y`
    DateFormat(String),
    In(Vec<String>),
    Exists { table: String, column: String },
    Unique { table: String, column: String },
    Email,
    Numeric,
    Integer,
}

impl Rule {
    pub fn name(&self) -> &'static str {
        match self {
            Rule::Required => "required",
            Rule::Nullable => "nullable",
            Rule::DateFormat(_) => "date_format",
            Rule::In(_) => "in",
            Rule::Exists { .. } => "exists",
            Rule::Unique { .. } => "unique",
            Rule::Email => "email",
            Rule::Numeric => "numeric",
            Rule::Integer => "integer",
        }
    }
}

impl FromStr for Rule {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, params) = match s.split_once(':') {
            Some((name, params)) => (name.trim(), Some(params.trim())),
            None => (s.trim(), None),
        };

        let table_column = |params: Option<&str>| -> Result<(String, String), SchemaError> {
            let params = params.ok_or_else(|| SchemaError::InvalidRule(s.to_string()))?;
            let (table, column) = params
                .split_once(',')
                .ok_or_else(|| SchemaError::InvalidRule(s.to_string()))?;
            let (table, column) = (table.trim(), column.trim());
            if !is_safe_identifier(table) || !is_safe_identifier(column) {
                return Err(SchemaError::InvalidIdentifier(params.to_string()));
            }
            Ok((table.to_string(), column.to_string()))
        };

        let rule = match (name, params) {
            ("required", None) => Rule::Required,
            ("nullable", None) => Rule::Nullable,
            ("email", None) => Rule::Email,
            ("numeric", None) => Rule::Numeric,
            ("integer", None) => Rule::Integer,
            ("date_format", Some(format)) if !format.is_empty() => {
                Rule::DateFormat(format.to_string())
            }
            ("in", Some(list)) => Rule::In(
                list.split(',')
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .collect(),
            ),
            ("exists", params) => {
                let (table, column) = table_column(params)?;
                Rule::Exists { table, column }
            }
            ("unique", params) => {
                let (table, column) = table_column(params)?;
                Rule::Unique { table, column }
            }
            _ => return Err(SchemaError::InvalidRule(s.to_string())),
        };

        Ok(rule)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::DateFormat(format) => write!(f, "date_format:{}", format),
            Rule::In(values) => write!(f, "in:{}", values.join(",")),
            Rule::Exists { table, column } => write!(f, "exists:{},{}", table, column),
            Rule::Unique { table, column } => write!(f, "unique:{},{}", table, column),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldSchema {
    pub key: String,
    pub label: String,
    pub field_type: FieldType,
    pub rules: Vec<Rule>,
}

impl FieldSchema {
    /// The `date_format` rule's format, if the field has one
    pub fn date_format(&self) -> Option<&str> {
        self.rules.iter().find_map(|r| match r {
            Rule::DateFormat(format) => Some(format.as_str()),
            _ => None,
        })
    }
}

/// Validated schema for one import slot
#[derive(Debug, Clone)]
pub struct SchemaConfig {
    /// Registry key, `<import_type>.<slot>`
    pub key: String,
    pub import_type: String,
    pub slot: String,
    pub label: String,
    pub permission: Option<String>,
    /// Ordered as configured; every field is a required header.
    pub fields: Vec<FieldSchema>,
    pub match_keys: Vec<String>,
    pub target: TargetModel,
}

impl SchemaConfig {
    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.key.as_str())
    }

    pub fn field(&self, key: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub fn is_match_key(&self, key: &str) -> bool {
        self.match_keys.iter().any(|k| k == key)
    }
}

/// A target table with the union of columns every slot writes to it
#[derive(Debug, Clone)]
pub struct EntityModel {
    pub target: TargetModel,
    pub columns: Vec<(String, FieldType)>,
}

impl EntityModel {
    pub fn column_type(&self, column: &str) -> Option<FieldType> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, t)| *t)
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Invalid schema JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid validation rule '{0}'")]
    InvalidRule(String),

    #[error("Unsafe SQL identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("Unsupported date format '{0}'")]
    InvalidDateFormat(String),

    #[error("Schema '{schema}': {message}")]
    Invalid { schema: String, message: String },
}

/// Lowercase ASCII identifier: `[a-z_][a-z0-9_]*`
pub fn is_safe_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    s.len() <= 63 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_rules() {
        assert_eq!("required".parse::<Rule>().unwrap(), Rule::Required);
        assert_eq!("nullable".parse::<Rule>().unwrap(), Rule::Nullable);
        assert_eq!("email".parse::<Rule>().unwrap(), Rule::Email);
    }

    #[test]
    fn test_parse_parameterised_rules() {
        assert_eq!(
            "date_format:d.m.Y".parse::<Rule>().unwrap(),
            Rule::DateFormat("d.m.Y".into())
        );
        assert_eq!(
            "in:PT,Amazon".parse::<Rule>().unwrap(),
            Rule::In(vec!["PT".into(), "Amazon".into()])
        );
        assert_eq!(
            "exists:products,sku".parse::<Rule>().unwrap(),
            Rule::Exists { table: "products".into(), column: "sku".into() }
        );
        assert_eq!(
            "unique:items,item_id".parse::<Rule>().unwrap(),
            Rule::Unique { table: "items".into(), column: "item_id".into() }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_and_unsafe() {
        assert!("regex:/a/".parse::<Rule>().is_err());
        assert!("exists:products".parse::<Rule>().is_err());
        assert!(matches!(
            "exists:products;drop,sku".parse::<Rule>(),
            Err(SchemaError::InvalidIdentifier(_))
        ));
        assert!("required:yes".parse::<Rule>().is_err());
    }

    #[test]
    fn test_rule_display_round_trips_config_string() {
        for raw in ["required", "date_format:d.m.Y", "in:PT,Amazon", "exists:products,sku"] {
            assert_eq!(raw.parse::<Rule>().unwrap().to_string(), raw);
        }
    }

    #[test]
    fn test_safe_identifier() {
        assert!(is_safe_identifier("user_orders"));
        assert!(is_safe_identifier("_tmp1"));
        assert!(!is_safe_identifier("Orders"));
        assert!(!is_safe_identifier("1orders"));
        assert!(!is_safe_identifier("orders\"--"));
        assert!(!is_safe_identifier(""));
    }
}
