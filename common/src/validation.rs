// Output validation for job insert/update files
//
// Validation is all-or-nothing per file: the first bad document rejects the
// whole batch so a half-valid file can never be partially applied.

use crate::errors::ValidationError;
use crate::models::{InsertTarget, UpdateTarget};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{info, instrument};

/// The only update operator accepted in update files
pub const SET_OPERATOR: &str = "set";

/// A validated batch of documents read from one output file
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentBatch {
    pub source: PathBuf,
    pub key_field: String,
    pub documents: Vec<Map<String, Value>>,
}

impl DocumentBatch {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Document ids in batch order
    pub fn document_ids(&self) -> Vec<String> {
        self.documents
            .iter()
            .filter_map(|doc| doc.get(&self.key_field).and_then(key_to_string))
            .collect()
    }

    /// Union of the fields set anywhere in the batch, key excluded
    pub fn updated_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self
            .documents
            .iter()
            .flat_map(|doc| doc.keys())
            .filter(|k| **k != self.key_field)
            .cloned()
            .collect();
        fields.sort();
        fields.dedup();
        fields
    }
}

/// Render a key value as a document id. Only non-empty strings and numbers qualify.
pub fn key_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// OutputValidator checks job output files against their target definitions
#[derive(Debug, Clone, Default)]
pub struct OutputValidator;

impl OutputValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate an insert file for one target
    #[instrument(skip(self, target), fields(index_name = %target.index_name))]
    pub async fn validate_insert_file(
        &self,
        path: &Path,
        target: &InsertTarget,
    ) -> Result<DocumentBatch, ValidationError> {
        let documents = read_documents(path).await?;
        let batch = validate_insert(path, documents, target)?;
        info!(
            file = %path.display(),
            documents = batch.len(),
            "Insert file passed validation"
        );
        Ok(batch)
    }

    /// Validate an update file for one target
    #[instrument(skip(self, target), fields(index_name = %target.index_name))]
    pub async fn validate_update_file(
        &self,
        path: &Path,
        target: &UpdateTarget,
    ) -> Result<DocumentBatch, ValidationError> {
        let documents = read_documents(path).await?;
        let batch = validate_update(path, documents, target)?;
        info!(
            file = %path.display(),
            documents = batch.len(),
            allowed_fields = ?target.allowed_fields,
            "Update file passed validation"
        );
        Ok(batch)
    }
}

/// Read a file that must hold a JSON array
pub async fn read_documents(path: &Path) -> Result<Vec<Value>, ValidationError> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|e| ValidationError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

    let parsed: Value = serde_json::from_slice(&raw).map_err(|e| ValidationError::InvalidJson {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    match parsed {
        Value::Array(documents) => Ok(documents),
        _ => Err(ValidationError::NotAnArray {
            path: path.display().to_string(),
        }),
    }
}

/// Insert documents need a usable key; other fields pass through unchecked
pub fn validate_insert(
    path: &Path,
    documents: Vec<Value>,
    target: &InsertTarget,
) -> Result<DocumentBatch, ValidationError> {
    let documents = documents
        .into_iter()
        .enumerate()
        .map(|(index, doc)| {
            let doc = as_object(path, index, doc)?;
            check_key(path, index, &doc, &target.key_field)?;
            Ok(doc)
        })
        .collect::<Result<Vec<_>, ValidationError>>()?;

    Ok(DocumentBatch {
        source: path.to_path_buf(),
        key_field: target.key_field.clone(),
        documents,
    })
}

/// Update documents carry the key plus `{"set": value}` for allow-listed fields only
pub fn validate_update(
    path: &Path,
    documents: Vec<Value>,
    target: &UpdateTarget,
) -> Result<DocumentBatch, ValidationError> {
    let documents = documents
        .into_iter()
        .enumerate()
        .map(|(index, doc)| {
            let doc = as_object(path, index, doc)?;
            check_key(path, index, &doc, &target.key_field)?;

            for (field, value) in &doc {
                if *field == target.key_field {
                    continue;
                }
                if !target.allowed_fields.contains(field) {
                    return Err(ValidationError::FieldNotAllowed {
                        path: path.display().to_string(),
                        index,
                        field: field.clone(),
                        allowed: target.allowed_fields.iter().cloned().collect(),
                    });
                }
                check_set_operation(path, index, field, value)?;
            }
            Ok(doc)
        })
        .collect::<Result<Vec<_>, ValidationError>>()?;

    Ok(DocumentBatch {
        source: path.to_path_buf(),
        key_field: target.key_field.clone(),
        documents,
    })
}

fn as_object(path: &Path, index: usize, doc: Value) -> Result<Map<String, Value>, ValidationError> {
    match doc {
        Value::Object(map) => Ok(map),
        _ => Err(ValidationError::NotAnObject {
            path: path.display().to_string(),
            index,
        }),
    }
}

fn check_key(
    path: &Path,
    index: usize,
    doc: &Map<String, Value>,
    key: &str,
) -> Result<(), ValidationError> {
    let value = doc.get(key).ok_or_else(|| ValidationError::MissingKey {
        path: path.display().to_string(),
        index,
        key: key.to_string(),
    })?;

    if key_to_string(value).is_none() {
        return Err(ValidationError::InvalidKey {
            path: path.display().to_string(),
            index,
            key: key.to_string(),
            reason: format!("expected a non-empty string or number, got {}", value),
        });
    }
    Ok(())
}

fn check_set_operation(
    path: &Path,
    index: usize,
    field: &str,
    value: &Value,
) -> Result<(), ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidOperation {
        path: path.display().to_string(),
        index,
        field: field.to_string(),
        reason,
    };

    let operation = value
        .as_object()
        .ok_or_else(|| invalid(format!("expected {{\"set\": value}}, got {}", value)))?;

    if operation.len() != 1 || !operation.contains_key(SET_OPERATOR) {
        let operators: Vec<&String> = operation.keys().collect();
        return Err(invalid(format!(
            "expected exactly the \"set\" operator, got {:?}",
            operators
        )));
    }
    Ok(())
}
