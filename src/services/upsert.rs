//! Update-or-create of target entities with audit diffing

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::error::ImportError;
use crate::services::dates;
use crate::services::recorder::LogRecorder;
use crate::services::spreadsheet::{format_number, CoercionError, Sheet};
use crate::services::validator::MatchValues;
use crate::types::{
    AuditLogEntry, EntityModel, FieldSchema, FieldType, FieldValues, RowRecord, SchemaConfig,
    TargetModel,
};

// =============================================================================
// REPOSITORIES
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertResult {
    pub id: Uuid,
    /// Stored values before the update; `None` when the record was created
    pub previous: Option<FieldValues>,
}

/// Storage for one target table.
///
/// Values are exchanged as text in storage form: dates `Y-m-d`, numbers as
/// plain decimals.
#[async_trait]
pub trait EntityRepository: Send + Sync {
    fn model(&self) -> &EntityModel;

    /// Find the record matching every `matched` column, update it with
    /// `payload`, or create it from both.
    async fn upsert(&self, matched: &FieldValues, payload: &FieldValues) -> Result<UpsertResult>;

    /// Link imported records to the actor through the target's link table
    async fn attach_to_actor(&self, actor_id: Uuid, ids: &[Uuid], import_type: &str) -> Result<()>;
}

/// Target table -> repository
#[derive(Clone, Default)]
pub struct ModelRegistry {
    repositories: HashMap<String, Arc<dyn EntityRepository>>,
}

impl ModelRegistry {
    pub fn build<F>(models: Vec<EntityModel>, mut make: F) -> Self
    where
        F: FnMut(EntityModel) -> Arc<dyn EntityRepository>,
    {
        let repositories = models
            .into_iter()
            .map(|model| (model.target.table.clone(), make(model)))
            .collect();
        Self { repositories }
    }

    pub fn resolve(&self, target: &TargetModel) -> Result<Arc<dyn EntityRepository>, ImportError> {
        self.repositories
            .get(&target.table)
            .cloned()
            .ok_or_else(|| ImportError::UnknownModel(target.entity.clone()))
    }
}

// =============================================================================
// VALUE PREPARATION
// =============================================================================

/// Resolve numeric fields (plain numbers or formulas) to plain decimals.
///
/// Fields that cannot be resolved keep their raw value and are returned as
/// failures, to be reported as validation errors.
pub fn resolve_numeric_fields(
    mut row: RowRecord,
    schema: &SchemaConfig,
    sheet: &Sheet,
) -> (RowRecord, BTreeMap<String, CoercionError>) {
    let mut failures = BTreeMap::new();

    for field in schema.fields.iter().filter(|f| f.field_type.is_numeric()) {
        let raw = match row.get(&field.key) {
            Some(raw) => raw.to_string(),
            None => continue,
        };

        let resolved = sheet.resolve_number(&raw).and_then(|n| {
            if field.field_type == FieldType::Integer && n.fract() != 0.0 {
                Err(CoercionError::NotInteger(raw.clone()))
            } else {
                Ok(n)
            }
        });

        match resolved {
            Ok(n) => row.set(&field.key, Some(format_number(n))),
            Err(e) => {
                failures.insert(field.key.clone(), e);
            }
        }
    }

    (row, failures)
}

/// Storage form of a validated cell value
pub fn storage_value(field: &FieldSchema, raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    match field.field_type {
        FieldType::Date => dates::parse_date(raw, field.date_format()).map(dates::to_storage),
        _ => Some(raw.to_string()),
    }
}

/// Match-key values of a row in storage form
pub fn match_values(schema: &SchemaConfig, row: &RowRecord) -> MatchValues {
    schema
        .fields
        .iter()
        .filter(|f| schema.is_match_key(&f.key))
        .map(|f| (f.key.clone(), storage_value(f, row.get(&f.key))))
        .collect()
}

/// Split a row into match fields and payload fields.
///
/// Only schema fields survive; headers that normalized to an empty key or
/// to an unknown column are dropped.
pub fn split_fields(schema: &SchemaConfig, row: &RowRecord) -> (FieldValues, FieldValues) {
    let mut matched = FieldValues::new();
    let mut payload = FieldValues::new();

    for field in &schema.fields {
        let value = storage_value(field, row.get(&field.key));
        if schema.is_match_key(&field.key) {
            matched.insert(field.key.clone(), value);
        } else {
            payload.insert(field.key.clone(), value);
        }
    }

    (matched, payload)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub column: String,
    pub old_value: String,
    pub new_value: String,
}

/// Payload fields whose value changed, in display form.
///
/// A field is skipped when either side is null or empty.
pub fn diff_fields(schema: &SchemaConfig, previous: &FieldValues, payload: &FieldValues) -> Vec<FieldChange> {
    schema
        .fields
        .iter()
        .filter_map(|field| {
            let new = payload.get(&field.key)?.as_deref().filter(|v| !v.is_empty())?;
            let old = previous.get(&field.key)?.as_deref().filter(|v| !v.is_empty())?;

            let (old_display, new_display) = display_pair(field.field_type, old, new);
            let changed = match field.field_type {
                FieldType::Double | FieldType::Integer => {
                    match (old.parse::<f64>(), new.parse::<f64>()) {
                        (Ok(a), Ok(b)) => a != b,
                        _ => old_display != new_display,
                    }
                }
                _ => old_display != new_display,
            };

            changed.then(|| FieldChange {
                column: field.key.clone(),
                old_value: old_display,
                new_value: new_display,
            })
        })
        .collect()
}

fn display_pair(field_type: FieldType, old: &str, new: &str) -> (String, String) {
    let display = |v: &str| -> String {
        match field_type {
            FieldType::Date => dates::parse_date(v, Some("Y-m-d"))
                .map(dates::to_display)
                .unwrap_or_else(|| v.to_string()),
            FieldType::Double | FieldType::Integer => v
                .parse::<f64>()
                .map(format_number)
                .unwrap_or_else(|_| v.to_string()),
            FieldType::String => v.to_string(),
        }
    };
    (display(old), display(new))
}

// =============================================================================
// ENGINE
// =============================================================================

/// Applies validated rows of one run to the target repository
pub struct UpsertEngine<'a> {
    schema: &'a SchemaConfig,
    repository: Arc<dyn EntityRepository>,
    recorder: &'a dyn LogRecorder,
}

impl<'a> UpsertEngine<'a> {
    pub fn new(
        schema: &'a SchemaConfig,
        repository: Arc<dyn EntityRepository>,
        recorder: &'a dyn LogRecorder,
    ) -> Self {
        Self {
            schema,
            repository,
            recorder,
        }
    }

    /// Create or update the row's record and write one audit entry per
    /// changed field. Returns the record id.
    pub async fn apply(&self, row: &RowRecord, import_run_id: Uuid, row_number: i32) -> Result<Uuid> {
        let (matched, payload) = split_fields(self.schema, row);
        let result = self.repository.upsert(&matched, &payload).await?;

        if let Some(previous) = &result.previous {
            for change in diff_fields(self.schema, previous, &payload) {
                let entry = AuditLogEntry {
                    id: Uuid::new_v4(),
                    import_run_id,
                    target_entity_id: result.id,
                    entity_type: self.schema.target.entity.clone(),
                    row_number,
                    column: change.column,
                    old_value: change.old_value,
                    new_value: change.new_value,
                    created_at: Utc::now(),
                };
                self.recorder.record_audit(&entry).await?;
            }
        }

        Ok(result.id)
    }

    pub fn repository(&self) -> &Arc<dyn EntityRepository> {
        &self.repository
    }
}
