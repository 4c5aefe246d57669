//! Field-level validation of record payloads before they reach a backend.
//!
//! Every check appends to a [`ValidationErrors`] list so a caller sees all of the problems with a
//! request at once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::LimitsConfig;
use crate::models::{
    ListQuery, MetadataInput, MetadataPatch, NewVectorRecord, RecordChanges, RecordMetadata,
    SimilarityQuery, SourceType, DEFAULT_MODEL_VERSION, MAX_CONTENT_PREVIEW_CHARS,
};
use crate::storage::SortSpec;
use crate::vector_math;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    fn extend_prefixed(&mut self, prefix: &str, other: ValidationErrors) {
        for error in other.errors {
            self.add(format!("{}.{}", prefix, error.field), error.message);
        }
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        f.write_str(&parts.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    Create,
    Update,
    Search,
}

#[derive(Debug, Clone)]
pub struct RecordValidator {
    limits: LimitsConfig,
}

impl RecordValidator {
    pub fn new(limits: LimitsConfig) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    pub fn validate(
        &self,
        mode: ValidationMode,
        vector: Option<&[f32]>,
        metadata: Option<&MetadataInput>,
    ) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        match vector {
            Some(vector) => self.check_vector(mode, vector, &mut errors),
            None if mode != ValidationMode::Update => errors.add("vector", "is required"),
            None => {}
        }

        match metadata {
            Some(metadata) => check_metadata(mode, metadata, &mut errors),
            None if mode == ValidationMode::Create => {
                errors.add("metadata", "is required");
            }
            None => {}
        }

        errors.into_result()
    }

    pub fn validate_new(&self, record: &NewVectorRecord) -> Result<(), ValidationErrors> {
        self.validate(
            ValidationMode::Create,
            Some(&record.vector),
            Some(&record.metadata),
        )
    }

    pub fn validate_changes(&self, changes: &RecordChanges) -> Result<(), ValidationErrors> {
        if changes.vector.is_none() && changes.metadata.is_none() {
            return Err(ValidationErrors::single(
                "body",
                "must contain vector or metadata",
            ));
        }
        self.validate(
            ValidationMode::Update,
            changes.vector.as_deref(),
            changes.metadata.as_ref(),
        )
    }

    pub fn validate_batch(&self, items: &[NewVectorRecord]) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if items.is_empty() || items.len() > self.limits.max_batch_size {
            errors.add(
                "items",
                format!(
                    "must contain between 1 and {} records, got {}",
                    self.limits.max_batch_size,
                    items.len()
                ),
            );
            return errors.into_result();
        }

        for (index, item) in items.iter().enumerate() {
            if let Err(item_errors) = self.validate_new(item) {
                errors.extend_prefixed(&format!("items[{}]", index), item_errors);
            }
        }

        errors.into_result()
    }

    pub fn validate_similarity_query(
        &self,
        query: &SimilarityQuery,
    ) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        self.check_vector(ValidationMode::Search, &query.vector, &mut errors);

        if let Some(limit) = query.limit {
            if limit == 0 || limit > self.limits.max_search_limit {
                errors.add(
                    "limit",
                    format!("must be between 1 and {}", self.limits.max_search_limit),
                );
            }
        }
        if let Some(source_type) = &query.source_type {
            if let Err(message) = source_type.parse::<SourceType>() {
                errors.add("source_type", message);
            }
        }
        if let (Some(after), Some(before)) = (query.created_after, query.created_before) {
            if after > before {
                errors.add("created_after", "must not be later than created_before");
            }
        }

        errors.into_result()
    }

    pub fn validate_list_query(&self, query: &ListQuery) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if query.page == 0 {
            errors.add("page", "must be at least 1");
        } else if query.checked_skip().is_none() {
            errors.add("page", "is too large for the requested limit");
        }
        if query.limit == 0 || query.limit > self.limits.max_page_size {
            errors.add(
                "limit",
                format!("must be between 1 and {}", self.limits.max_page_size),
            );
        }
        if let Some(source_type) = &query.source_type {
            if let Err(message) = source_type.parse::<SourceType>() {
                errors.add("source_type", message);
            }
        }
        if let Some(sort) = &query.sort {
            if SortSpec::parse(sort).is_none() {
                errors.add("sort", format!("unknown sort field '{}'", sort));
            }
        }

        errors.into_result()
    }

    fn check_vector(&self, mode: ValidationMode, vector: &[f32], errors: &mut ValidationErrors) {
        if let Err(e) = vector_math::validate_vector(vector, None, self.limits.max_dimensions) {
            errors.add("vector", e.to_string());
            return;
        }

        let min = match mode {
            ValidationMode::Create | ValidationMode::Search => self.limits.min_dimensions,
            ValidationMode::Update => 1,
        };
        if vector.len() < min {
            errors.add(
                "vector",
                format!(
                    "must have between {} and {} dimensions, got {}",
                    min,
                    self.limits.max_dimensions,
                    vector.len()
                ),
            );
        }
    }
}

fn check_metadata(mode: ValidationMode, metadata: &MetadataInput, errors: &mut ValidationErrors) {
    let required = mode == ValidationMode::Create;

    match &metadata.source_type {
        Some(source_type) => {
            if let Err(message) = source_type.parse::<SourceType>() {
                errors.add("metadata.source_type", message);
            }
        }
        None if required => errors.add("metadata.source_type", "is required"),
        None => {}
    }

    for (field, value) in [
        ("metadata.source_id", &metadata.source_id),
        ("metadata.user_id", &metadata.user_id),
    ] {
        match value {
            Some(v) if v.trim().is_empty() => errors.add(field, "cannot be empty"),
            None if required => errors.add(field, "is required"),
            _ => {}
        }
    }

    if let Some(preview) = &metadata.content_preview {
        if preview.chars().count() > MAX_CONTENT_PREVIEW_CHARS {
            errors.add(
                "metadata.content_preview",
                format!("must be at most {} characters", MAX_CONTENT_PREVIEW_CHARS),
            );
        }
    }

    if let Some(tags) = &metadata.tags {
        if tags.iter().any(|t| t.trim().is_empty()) {
            errors.add("metadata.tags", "cannot contain empty tags");
        }
    }

    if let Some(score) = metadata.confidence_score {
        if !(0.0..=1.0).contains(&score) {
            errors.add("metadata.confidence_score", "must be between 0 and 1");
        }
    }
}

fn parse_source_type(value: &str) -> Result<SourceType, ValidationErrors> {
    value
        .parse()
        .map_err(|message| ValidationErrors::single("metadata.source_type", message))
}

/// Builds stored metadata from a create payload.
pub(crate) fn metadata_from_input(
    input: &MetadataInput,
    dimensions: usize,
    now: DateTime<Utc>,
) -> Result<RecordMetadata, ValidationErrors> {
    let required = |field: &str, value: &Option<String>| {
        value
            .clone()
            .ok_or_else(|| ValidationErrors::single(field, "is required"))
    };

    let source_type = match &input.source_type {
        Some(value) => parse_source_type(value)?,
        None => {
            return Err(ValidationErrors::single(
                "metadata.source_type",
                "is required",
            ))
        }
    };

    Ok(RecordMetadata {
        source_type,
        source_id: required("metadata.source_id", &input.source_id)?,
        user_id: required("metadata.user_id", &input.user_id)?,
        content_preview: input.content_preview.clone(),
        model_version: input
            .model_version
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL_VERSION.to_string()),
        dimensions,
        tags: input.tags.iter().flatten().cloned().collect(),
        confidence_score: input.confidence_score,
        created_at: now,
        updated_at: now,
    })
}

pub(crate) fn patch_from_input(input: &MetadataInput) -> Result<MetadataPatch, ValidationErrors> {
    let source_type = input
        .source_type
        .as_deref()
        .map(parse_source_type)
        .transpose()?;

    Ok(MetadataPatch {
        source_type,
        source_id: input.source_id.clone(),
        user_id: input.user_id.clone(),
        content_preview: input.content_preview.clone(),
        model_version: input.model_version.clone(),
        tags: input.tags.as_ref().map(|t| t.iter().cloned().collect()),
        confidence_score: input.confidence_score,
    })
}
