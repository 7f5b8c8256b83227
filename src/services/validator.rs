//! Row validation against a schema's typed rules
//!
//! Fields are validated independently and every failing rule of a field is
//! reported, in rule order. An empty value on a field without `required`
//! skips its other rules.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::services::dates;
use crate::services::spreadsheet::CoercionError;
use crate::types::{FieldSchema, FieldType, RowRecord, Rule, SchemaConfig};

/// Column/value pairs identifying the record a row would update
pub type MatchValues = Vec<(String, Option<String>)>;

/// Database-backed checks for `exists` and `unique`
#[async_trait]
pub trait ReferenceLookup: Send + Sync {
    async fn exists(&self, table: &str, column: &str, value: &str) -> Result<bool>;

    /// Whether `value` is used by a record other than the one matching `except`
    async fn is_taken(
        &self,
        table: &str,
        column: &str,
        value: &str,
        except: &MatchValues,
    ) -> Result<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldErrors {
    pub column: String,
    pub value: Option<String>,
    pub messages: Vec<String>,
}

/// Field errors for one row, in schema field order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    errors: Vec<FieldErrors>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[FieldErrors] {
        &self.errors
    }

    /// Total (field, message) pairs
    pub fn message_count(&self) -> usize {
        self.errors.iter().map(|e| e.messages.len()).sum()
    }

    fn push(&mut self, column: &str, value: Option<&str>, messages: Vec<String>) {
        if !messages.is_empty() {
            self.errors.push(FieldErrors {
                column: column.to_string(),
                value: value.map(str::to_string),
                messages,
            });
        }
    }
}

pub struct RowValidator<'a> {
    schema: &'a SchemaConfig,
    lookup: &'a dyn ReferenceLookup,
}

impl<'a> RowValidator<'a> {
    pub fn new(schema: &'a SchemaConfig, lookup: &'a dyn ReferenceLookup) -> Self {
        Self { schema, lookup }
    }

    /// Validate one row.
    ///
    /// `except` identifies the row's own record for `unique` checks on the
    /// target table. Fields in `coercion_failures` report that failure
    /// instead of running their rules.
    pub async fn validate(
        &self,
        row: &RowRecord,
        except: &MatchValues,
        coercion_failures: &BTreeMap<String, CoercionError>,
    ) -> Result<ValidationOutcome> {
        let mut outcome = ValidationOutcome::default();

        for field in &self.schema.fields {
            let value = row.get(&field.key);

            if let Some(failure) = coercion_failures.get(&field.key) {
                outcome.push(&field.key, value, vec![coercion_message(field, failure)]);
                continue;
            }

            let messages = self.validate_field(field, value, except).await?;
            outcome.push(&field.key, value, messages);
        }

        Ok(outcome)
    }

    async fn validate_field(
        &self,
        field: &FieldSchema,
        value: Option<&str>,
        except: &MatchValues,
    ) -> Result<Vec<String>> {
        let attribute = attribute_name(&field.key);

        let value = match value {
            Some(v) => v,
            None => {
                return Ok(if field.rules.contains(&Rule::Required) {
                    vec![format!("The {} field is required.", attribute)]
                } else {
                    Vec::new()
                });
            }
        };

        let mut messages = Vec::new();
        for rule in &field.rules {
            let failed = match rule {
                Rule::Required | Rule::Nullable => None,
                Rule::DateFormat(format) => (!dates::matches_format(value, format))
                    .then(|| format!("The {} field must match the format {}.", attribute, format)),
                Rule::In(allowed) => (!allowed.iter().any(|a| a == value))
                    .then(|| format!("The selected {} is invalid.", attribute)),
                Rule::Exists { table, column } => {
                    let found = self.lookup.exists(table, column, value).await?;
                    (!found).then(|| format!("The selected {} is invalid.", attribute))
                }
                Rule::Unique { table, column } => {
                    let own_record = if *table == self.schema.target.table {
                        except.clone()
                    } else {
                        Vec::new()
                    };
                    let taken = self.lookup.is_taken(table, column, value, &own_record).await?;
                    taken.then(|| format!("The {} has already been taken.", attribute))
                }
                Rule::Email => (!is_valid_email(value))
                    .then(|| format!("The {} field must be a valid email address.", attribute)),
                Rule::Numeric => value
                    .parse::<f64>()
                    .is_err()
                    .then(|| format!("The {} field must be a number.", attribute)),
                Rule::Integer => value
                    .parse::<i64>()
                    .is_err()
                    .then(|| format!("The {} field must be an integer.", attribute)),
            };
            messages.extend(failed);
        }

        // Date fields must be storable even without an explicit format rule
        if field.field_type == FieldType::Date
            && field.date_format().is_none()
            && dates::parse_date(value, None).is_none()
        {
            messages.push(format!("The {} field must be a valid date.", attribute));
        }

        Ok(messages)
    }
}

/// `order_date` -> `order date`
pub fn attribute_name(key: &str) -> String {
    key.replace('_', " ")
}

fn coercion_message(field: &FieldSchema, failure: &CoercionError) -> String {
    let attribute = attribute_name(&field.key);
    match failure {
        CoercionError::NotNumeric(_) => format!("The {} field must be a number.", attribute),
        CoercionError::NotInteger(_) => format!("The {} field must be an integer.", attribute),
        other => format!("The {} field could not be calculated: {}.", attribute, other),
    }
}

fn is_valid_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::schema::SchemaRegistry;
    use crate::services::testing::MemoryStore;

    fn orders_row(channel: &str, sku: &str) -> RowRecord {
        RowRecord::from_iter([
            ("order_date", "15.01.2025"),
            ("channel", channel),
            ("sku", sku),
            ("item_description", ""),
            ("origin", "Lisbon"),
            ("so_num", "SO-1"),
            ("cost", "10"),
            ("shipping_cost", "2"),
            ("total_price", "12"),
        ])
    }

    #[tokio::test]
    async fn test_valid_row_has_no_errors() {
        let registry = SchemaRegistry::load(None).unwrap();
        let schema = registry.resolve("orders").unwrap();
        let store = MemoryStore::with_products(&["ABC"]);
        let validator = RowValidator::new(schema, &store);

        let outcome = validator
            .validate(&orders_row("PT", "ABC"), &Vec::new(), &BTreeMap::new())
            .await
            .unwrap();
        assert!(outcome.is_valid());
    }

    #[tokio::test]
    async fn test_in_and_exists_failures_reported_per_field() {
        let registry = SchemaRegistry::load(None).unwrap();
        let schema = registry.resolve("orders").unwrap();
        let store = MemoryStore::with_products(&["ABC"]);
        let validator = RowValidator::new(schema, &store);

        let outcome = validator
            .validate(&orders_row("InvalidChannel", "NOPE"), &Vec::new(), &BTreeMap::new())
            .await
            .unwrap();

        let errors = outcome.errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].column, "channel");
        assert_eq!(errors[0].value.as_deref(), Some("InvalidChannel"));
        assert_eq!(errors[0].messages, vec!["The selected channel is invalid."]);
        assert_eq!(errors[1].column, "sku");
    }

    #[tokio::test]
    async fn test_required_empty_reports_only_required() {
        let registry = SchemaRegistry::load(None).unwrap();
        let schema = registry.resolve("orders").unwrap();
        let store = MemoryStore::with_products(&["ABC"]);
        let validator = RowValidator::new(schema, &store);

        let mut row = orders_row("PT", "ABC");
        row.set("order_date", None);
        let outcome = validator.validate(&row, &Vec::new(), &BTreeMap::new()).await.unwrap();

        assert_eq!(outcome.message_count(), 1);
        assert_eq!(
            outcome.errors()[0].messages,
            vec!["The order date field is required."]
        );
    }

    #[tokio::test]
    async fn test_all_failing_rules_reported_in_order() {
        let registry = SchemaRegistry::load(None).unwrap();
        let schema = registry.resolve("clients_and_sales.clients").unwrap();
        let store = MemoryStore::default();
        store.seed_entity("clients", &[("client_id", "C-9"), ("email", "not-an-email")]);
        let validator = RowValidator::new(schema, &store);

        let row = RowRecord::from_iter([
            ("client_id", "C-1"),
            ("name", "Ana"),
            ("email", "not-an-email"),
            ("phone", ""),
        ]);
        let outcome = validator.validate(&row, &Vec::new(), &BTreeMap::new()).await.unwrap();

        assert_eq!(outcome.errors().len(), 1);
        assert_eq!(
            outcome.errors()[0].messages,
            vec![
                "The email field must be a valid email address.",
                "The email has already been taken.",
            ]
        );
    }

    #[tokio::test]
    async fn test_unique_ignores_own_record() {
        let registry = SchemaRegistry::load(None).unwrap();
        let schema = registry.resolve("items").unwrap();
        let store = MemoryStore::default();
        store.seed_entity("items", &[("item_id", "IT-1")]);
        let validator = RowValidator::new(schema, &store);

        let row = RowRecord::from_iter([
            ("item_id", "IT-1"),
            ("name", "Widget"),
            ("category", "Tools"),
            ("price", "9.5"),
            ("stock", "3"),
        ]);

        let conflicting = validator.validate(&row, &Vec::new(), &BTreeMap::new()).await.unwrap();
        assert_eq!(conflicting.errors()[0].messages, vec!["The item id has already been taken."]);

        let except = vec![("item_id".to_string(), Some("IT-1".to_string()))];
        let own = validator.validate(&row, &except, &BTreeMap::new()).await.unwrap();
        assert!(own.is_valid());
    }

    #[tokio::test]
    async fn test_coercion_failure_replaces_rules() {
        let registry = SchemaRegistry::load(None).unwrap();
        let schema = registry.resolve("orders").unwrap();
        let store = MemoryStore::with_products(&["ABC"]);
        let validator = RowValidator::new(schema, &store);

        let mut row = orders_row("PT", "ABC");
        row.set("cost", Some("=AVERAGE(A1:A2)".to_string()));
        let failures = BTreeMap::from([(
            "cost".to_string(),
            CoercionError::UnsupportedFormula("=AVERAGE(A1:A2)".to_string()),
        )]);

        let outcome = validator.validate(&row, &Vec::new(), &failures).await.unwrap();
        assert_eq!(outcome.errors().len(), 1);
        assert_eq!(outcome.errors()[0].column, "cost");
        assert!(outcome.errors()[0].messages[0].starts_with("The cost field could not be calculated"));
    }

    #[test]
    fn test_email_check() {
        assert!(is_valid_email("ana@example.com"));
        assert!(!is_valid_email("ana@example"));
        assert!(!is_valid_email("ana example@x.com"));
        assert!(!is_valid_email("@example.com"));
        assert!(!is_valid_email("a@b@c.com"));
    }

    #[test]
    fn test_attribute_name() {
        assert_eq!(attribute_name("shipping_cost"), "shipping cost");
    }
}
