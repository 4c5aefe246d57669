use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_MODEL_VERSION: &str = "unknown";
pub const MAX_CONTENT_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Journal,
    Mood,
    Activity,
    Therapy,
    Meditation,
    Other,
}

impl SourceType {
    pub const ALL: [SourceType; 6] = [
        SourceType::Journal,
        SourceType::Mood,
        SourceType::Activity,
        SourceType::Therapy,
        SourceType::Meditation,
        SourceType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Journal => "journal",
            SourceType::Mood => "mood",
            SourceType::Activity => "activity",
            SourceType::Therapy => "therapy",
            SourceType::Meditation => "meditation",
            SourceType::Other => "other",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                let allowed: Vec<&str> = SourceType::ALL.iter().map(|t| t.as_str()).collect();
                format!("must be one of: {}", allowed.join(", "))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub source_type: SourceType,
    pub source_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_preview: Option<String>,
    pub model_version: String,
    pub dimensions: usize,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: RecordMetadata,
}

/// Metadata as it arrives from a caller, before validation.
///
/// `source_type` stays a string here so the validator can report a bad value alongside every
/// other violated field instead of failing at deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataInput {
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub content_preview: Option<String>,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
}

impl MetadataInput {
    pub fn new(
        source_type: impl Into<String>,
        source_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            source_type: Some(source_type.into()),
            source_id: Some(source_id.into()),
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_content_preview(mut self, preview: impl Into<String>) -> Self {
        self.content_preview = Some(preview.into());
        self
    }

    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = Some(version.into());
        self
    }

    pub fn with_confidence_score(mut self, score: f64) -> Self {
        self.confidence_score = Some(score);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVectorRecord {
    pub vector: Vec<f32>,
    pub metadata: MetadataInput,
}

impl NewVectorRecord {
    pub fn new(vector: Vec<f32>, metadata: MetadataInput) -> Self {
        Self { vector, metadata }
    }
}

/// Partial update request. Omitted parts are left as stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordChanges {
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: Option<MetadataInput>,
}

/// Validated, typed subset of metadata fields to overwrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetadataPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
}

impl MetadataPatch {
    pub fn is_empty(&self) -> bool {
        *self == MetadataPatch::default()
    }

    /// Shallow merge: provided fields replace, omitted ones are kept.
    pub fn apply_to(&self, metadata: &mut RecordMetadata) {
        if let Some(source_type) = self.source_type {
            metadata.source_type = source_type;
        }
        if let Some(source_id) = &self.source_id {
            metadata.source_id = source_id.clone();
        }
        if let Some(user_id) = &self.user_id {
            metadata.user_id = user_id.clone();
        }
        if let Some(preview) = &self.content_preview {
            metadata.content_preview = Some(preview.clone());
        }
        if let Some(version) = &self.model_version {
            metadata.model_version = version.clone();
        }
        if let Some(tags) = &self.tags {
            metadata.tags = tags.clone();
        }
        if let Some(score) = self.confidence_score {
            metadata.confidence_score = Some(score);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> RecordMetadata {
        let now = Utc::now();
        RecordMetadata {
            source_type: SourceType::Journal,
            source_id: "entry-1".into(),
            user_id: "user-1".into(),
            content_preview: Some("first entry".into()),
            model_version: DEFAULT_MODEL_VERSION.into(),
            dimensions: 3,
            tags: BTreeSet::new(),
            confidence_score: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn source_type_parses_known_values() {
        assert_eq!("therapy".parse::<SourceType>(), Ok(SourceType::Therapy));
        let err = "podcast".parse::<SourceType>().unwrap_err();
        assert!(err.contains("journal"));
    }

    #[test]
    fn source_type_serializes_lowercase() {
        let json = serde_json::to_string(&SourceType::Meditation).unwrap();
        assert_eq!(json, "\"meditation\"");
    }

    #[test]
    fn patch_replaces_only_provided_fields() {
        let mut metadata = sample_metadata();
        let patch = MetadataPatch {
            tags: Some(["calm".to_string()].into_iter().collect()),
            confidence_score: Some(0.4),
            ..Default::default()
        };
        patch.apply_to(&mut metadata);

        assert!(metadata.tags.contains("calm"));
        assert_eq!(metadata.confidence_score, Some(0.4));
        assert_eq!(metadata.source_type, SourceType::Journal);
        assert_eq!(metadata.content_preview.as_deref(), Some("first entry"));
    }

    #[test]
    fn empty_patch_is_detected() {
        assert!(MetadataPatch::default().is_empty());
        let patch = MetadataPatch {
            user_id: Some("u".into()),
            ..Default::default()
        };
        assert!(!patch.is_empty());
    }
}
