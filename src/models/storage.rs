use serde::{Deserialize, Serialize};

use super::record::{RecordMetadata, SourceType, VectorRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCreateResult {
    pub inserted_count: usize,
    pub inserted_ids: Vec<String>,
    pub records: Vec<VectorRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    pub id: String,
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: RecordMetadata,
    pub similarity_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResponse {
    pub query_vector_dimensions: usize,
    pub results: Vec<SimilarRecord>,
    pub total_results: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTypeCount {
    pub source_type: SourceType,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionCount {
    pub dimensions: usize,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsReport {
    pub total_vectors: u64,
    pub source_type_distribution: Vec<SourceTypeCount>,
    pub dimension_distribution: Vec<DimensionCount>,
    pub collection_name: String,
}
