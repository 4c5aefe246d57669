//! Typed query vocabulary shared by every backend: filters, sort specs, update documents and
//! group-by stages.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

use crate::models::{MetadataPatch, VectorRecord};

/// Record fields a query can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Id,
    UserId,
    SourceType,
    SourceId,
    Tags,
    ModelVersion,
    Dimensions,
    ConfidenceScore,
    CreatedAt,
    UpdatedAt,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::UserId => "user_id",
            Field::SourceType => "source_type",
            Field::SourceId => "source_id",
            Field::Tags => "tags",
            Field::ModelVersion => "model_version",
            Field::Dimensions => "dimensions",
            Field::ConfidenceScore => "confidence_score",
            Field::CreatedAt => "created_at",
            Field::UpdatedAt => "updated_at",
        }
    }

    /// Accepts both `user_id` and `metadata.user_id`.
    pub fn parse(name: &str) -> Option<Field> {
        let name = name.strip_prefix("metadata.").unwrap_or(name);
        let field = match name {
            "id" => Field::Id,
            "user_id" => Field::UserId,
            "source_type" => Field::SourceType,
            "source_id" => Field::SourceId,
            "tags" => Field::Tags,
            "model_version" => Field::ModelVersion,
            "dimensions" => Field::Dimensions,
            "confidence_score" => Field::ConfidenceScore,
            "created_at" => Field::CreatedAt,
            "updated_at" => Field::UpdatedAt,
            _ => return None,
        };
        Some(field)
    }

    /// Values a record holds for this field. Tags yield one value per tag.
    pub fn values_of(&self, record: &VectorRecord) -> Vec<FieldValue> {
        let m = &record.metadata;
        match self {
            Field::Id => vec![FieldValue::Text(record.id.clone())],
            Field::UserId => vec![FieldValue::Text(m.user_id.clone())],
            Field::SourceType => vec![FieldValue::Text(m.source_type.as_str().to_string())],
            Field::SourceId => vec![FieldValue::Text(m.source_id.clone())],
            Field::Tags => m.tags.iter().cloned().map(FieldValue::Text).collect(),
            Field::ModelVersion => vec![FieldValue::Text(m.model_version.clone())],
            Field::Dimensions => vec![FieldValue::Integer(m.dimensions as i64)],
            Field::ConfidenceScore => m.confidence_score.map(FieldValue::Float).into_iter().collect(),
            Field::CreatedAt => vec![FieldValue::Timestamp(m.created_at)],
            Field::UpdatedAt => vec![FieldValue::Timestamp(m.updated_at)],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

impl PartialOrd for FieldValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (FieldValue::Text(a), FieldValue::Text(b)) => a.partial_cmp(b),
            (FieldValue::Integer(a), FieldValue::Integer(b)) => a.partial_cmp(b),
            (FieldValue::Float(a), FieldValue::Float(b)) => a.partial_cmp(b),
            (FieldValue::Integer(a), FieldValue::Float(b)) => (*a as f64).partial_cmp(b),
            (FieldValue::Float(a), FieldValue::Integer(b)) => a.partial_cmp(&(*b as f64)),
            (FieldValue::Timestamp(a), FieldValue::Timestamp(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<usize> for FieldValue {
    fn from(value: usize) -> Self {
        FieldValue::Integer(value as i64)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals(FieldValue),
    /// Any of the record's values for the field is in the set.
    AnyOf(Vec<FieldValue>),
    /// Inclusive on both ends; an open side is unbounded.
    Range {
        gte: Option<FieldValue>,
        lte: Option<FieldValue>,
    },
}

impl Condition {
    fn matches(&self, values: &[FieldValue]) -> bool {
        match self {
            Condition::Equals(expected) => values.iter().any(|v| v == expected),
            Condition::AnyOf(set) => values.iter().any(|v| set.contains(v)),
            Condition::Range { gte, lte } => values.iter().any(|v| {
                let above = gte.as_ref().map_or(true, |low| {
                    matches!(
                        v.partial_cmp(low),
                        Some(Ordering::Greater | Ordering::Equal)
                    )
                });
                let below = lte.as_ref().map_or(true, |high| {
                    matches!(v.partial_cmp(high), Some(Ordering::Less | Ordering::Equal))
                });
                above && below
            }),
        }
    }
}

/// Conjunction of field conditions. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(Field, Condition)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new().eq(Field::Id, id.into())
    }

    pub fn eq(mut self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.clauses.push((field, Condition::Equals(value.into())));
        self
    }

    pub fn any_of<I, V>(mut self, field: Field, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FieldValue>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.clauses.push((field, Condition::AnyOf(values)));
        self
    }

    pub fn range(mut self, field: Field, gte: Option<FieldValue>, lte: Option<FieldValue>) -> Self {
        if gte.is_some() || lte.is_some() {
            self.clauses.push((field, Condition::Range { gte, lte }));
        }
        self
    }

    pub fn clauses(&self) -> &[(Field, Condition)] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, record: &VectorRecord) -> bool {
        self.clauses
            .iter()
            .all(|(field, condition)| condition.matches(&field.values_of(record)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub field: Field,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(field: Field, direction: SortDirection) -> Self {
        Self { field, direction }
    }

    /// `created_at` sorts ascending, `-created_at` descending. A leading `+` is accepted too.
    pub fn parse(token: &str) -> Option<SortSpec> {
        let token = token.trim();
        let (direction, name) = match token.strip_prefix('-') {
            Some(rest) => (SortDirection::Descending, rest),
            None => (
                SortDirection::Ascending,
                token.strip_prefix('+').unwrap_or(token),
            ),
        };
        Field::parse(name).map(|field| SortSpec { field, direction })
    }

    /// Orders two records by the sort field, breaking ties by id so pages are stable.
    pub fn compare(&self, a: &VectorRecord, b: &VectorRecord) -> Ordering {
        let left = self.field.values_of(a).into_iter().next();
        let right = self.field.values_of(b).into_iter().next();
        let ordering = match (left, right) {
            (Some(l), Some(r)) => l.partial_cmp(&r).unwrap_or(Ordering::Equal),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let ordering = match self.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };
        ordering.then_with(|| a.id.cmp(&b.id))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub sort: Option<SortSpec>,
    pub limit: Option<usize>,
    pub skip: usize,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }
}

/// Set-style update applied by `find_one_and_update`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordUpdate {
    pub vector: Option<Vec<f32>>,
    pub metadata: MetadataPatch,
    pub updated_at: DateTime<Utc>,
}

impl RecordUpdate {
    /// Smallest step a stored timestamp can take; Postgres keeps microseconds.
    pub const MIN_TIMESTAMP_STEP_MICROS: i64 = 1;

    /// The update's timestamp, or one step past `previous` if the clock has not moved past it.
    pub fn stamp_after(&self, previous: DateTime<Utc>) -> DateTime<Utc> {
        self.updated_at
            .max(previous + chrono::Duration::microseconds(Self::MIN_TIMESTAMP_STEP_MICROS))
    }

    pub fn apply(&self, record: &mut VectorRecord) {
        if let Some(vector) = &self.vector {
            record.vector = vector.clone();
            record.metadata.dimensions = vector.len();
        }
        self.metadata.apply_to(&mut record.metadata);
        record.metadata.updated_at = self.stamp_after(record.metadata.updated_at);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOrder {
    CountDescending,
    KeyAscending,
}

/// Single group-and-count aggregation stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupBy {
    pub field: Field,
    pub order: GroupOrder,
}

impl GroupBy {
    pub fn new(field: Field, order: GroupOrder) -> Self {
        Self { field, order }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupCount {
    pub key: FieldValue,
    pub count: u64,
}
