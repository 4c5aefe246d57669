use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    error::{BackendError, BackendErrorKind, BackendResult},
    models::VectorRecord,
    storage::{
        query::{Filter, FindOptions, GroupBy, GroupCount, GroupOrder, RecordUpdate},
        traits::{Cursor, DeleteOutcome, DocumentStore, InsertManyResult, ScoredRecord},
    },
    vector_math,
};

/// In-process backend keyed by record id.
///
/// Ranking is an exhaustive cosine scan, so this is meant for tests, local runs and small
/// collections.
pub struct MemoryDocumentStore {
    records: RwLock<BTreeMap<String, VectorRecord>>,
    closed: AtomicBool,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> BackendResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::new(
                BackendErrorKind::NotConnected,
                "memory store has been closed",
            ));
        }
        Ok(())
    }

    fn duplicate(id: &str) -> BackendError {
        BackendError::new(
            BackendErrorKind::DuplicateKey,
            format!("record {} already exists", id),
        )
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn insert_one(&self, record: VectorRecord) -> BackendResult<String> {
        self.ensure_open()?;
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(Self::duplicate(&record.id));
        }
        let id = record.id.clone();
        records.insert(id.clone(), record);
        Ok(id)
    }

    async fn insert_many(&self, batch: Vec<VectorRecord>) -> BackendResult<InsertManyResult> {
        self.ensure_open()?;
        let mut records = self.records.write().await;

        // All-or-nothing: reject the batch before touching the map.
        {
            let mut seen = std::collections::HashSet::new();
            for record in &batch {
                if records.contains_key(&record.id) || !seen.insert(record.id.as_str()) {
                    return Err(Self::duplicate(&record.id));
                }
            }
        }

        let inserted_ids: Vec<String> = batch.iter().map(|r| r.id.clone()).collect();
        for record in batch {
            records.insert(record.id.clone(), record);
        }

        Ok(InsertManyResult {
            inserted_count: inserted_ids.len(),
            inserted_ids,
        })
    }

    async fn find_one(&self, filter: &Filter) -> BackendResult<Option<VectorRecord>> {
        self.ensure_open()?;
        let records = self.records.read().await;
        Ok(records.values().find(|r| filter.matches(r)).cloned())
    }

    async fn find(
        &self,
        filter: &Filter,
        options: FindOptions,
    ) -> BackendResult<Cursor<VectorRecord>> {
        self.ensure_open()?;
        let records = self.records.read().await;

        let mut matched: Vec<&VectorRecord> =
            records.values().filter(|r| filter.matches(r)).collect();
        if let Some(sort) = options.sort {
            matched.sort_by(|a, b| sort.compare(a, b));
        }

        let page = matched
            .into_iter()
            .skip(options.skip)
            .take(options.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect::<Vec<_>>();
        Ok(Cursor::new(page))
    }

    async fn find_ranked(
        &self,
        filter: &Filter,
        query: &[f32],
        limit: usize,
    ) -> BackendResult<Cursor<ScoredRecord>> {
        self.ensure_open()?;
        let records = self.records.read().await;

        // Records of another dimensionality are not comparable and are left out.
        let mut scored: Vec<ScoredRecord> = records
            .values()
            .filter(|r| filter.matches(r))
            .filter_map(|r| {
                vector_math::cosine_similarity(query, &r.vector)
                    .ok()
                    .map(|score| ScoredRecord {
                        record: r.clone(),
                        score,
                    })
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(limit);
        Ok(Cursor::new(scored))
    }

    async fn find_one_and_update(
        &self,
        filter: &Filter,
        update: RecordUpdate,
    ) -> BackendResult<Option<VectorRecord>> {
        self.ensure_open()?;
        let mut records = self.records.write().await;
        let Some(record) = records.values_mut().find(|r| filter.matches(r)) else {
            return Ok(None);
        };
        update.apply(record);
        Ok(Some(record.clone()))
    }

    async fn delete_one(&self, filter: &Filter) -> BackendResult<DeleteOutcome> {
        self.ensure_open()?;
        let mut records = self.records.write().await;
        let id = records
            .values()
            .find(|r| filter.matches(r))
            .map(|r| r.id.clone());

        let deleted_count = match id {
            Some(id) => u64::from(records.remove(&id).is_some()),
            None => 0,
        };
        Ok(DeleteOutcome { deleted_count })
    }

    async fn count_documents(&self, filter: &Filter) -> BackendResult<u64> {
        self.ensure_open()?;
        let records = self.records.read().await;
        Ok(records.values().filter(|r| filter.matches(r)).count() as u64)
    }

    async fn estimated_document_count(&self) -> BackendResult<u64> {
        self.ensure_open()?;
        Ok(self.records.read().await.len() as u64)
    }

    async fn aggregate(&self, group: GroupBy) -> BackendResult<Vec<GroupCount>> {
        self.ensure_open()?;
        let records = self.records.read().await;

        let mut groups: Vec<GroupCount> = Vec::new();
        for record in records.values() {
            for key in group.field.values_of(record) {
                match groups.iter_mut().find(|g| g.key == key) {
                    Some(existing) => existing.count += 1,
                    None => groups.push(GroupCount { key, count: 1 }),
                }
            }
        }

        let by_key = |a: &GroupCount, b: &GroupCount| {
            a.key
                .partial_cmp(&b.key)
                .unwrap_or(std::cmp::Ordering::Equal)
        };
        match group.order {
            GroupOrder::CountDescending => {
                groups.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| by_key(a, b)))
            }
            GroupOrder::KeyAscending => groups.sort_by(by_key),
        }
        Ok(groups)
    }

    async fn health_check(&self) -> BackendResult<bool> {
        Ok(!self.closed.load(Ordering::Acquire))
    }

    async fn close(&self) -> BackendResult<()> {
        self.closed.store(true, Ordering::Release);
        log::info!("Memory document store closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetadataPatch, RecordMetadata, SourceType};
    use crate::storage::query::{Field, FieldValue, SortSpec};
    use chrono::{Duration, Utc};

    fn record(id: &str, source_type: SourceType, vector: Vec<f32>, minutes_ago: i64) -> VectorRecord {
        let at = Utc::now() - Duration::minutes(minutes_ago);
        VectorRecord {
            id: id.to_string(),
            metadata: RecordMetadata {
                source_type,
                source_id: format!("src-{}", id),
                user_id: "user-1".into(),
                content_preview: None,
                model_version: "unknown".into(),
                dimensions: vector.len(),
                tags: Default::default(),
                confidence_score: None,
                created_at: at,
                updated_at: at,
            },
            vector,
        }
    }

    #[tokio::test]
    async fn insert_one_rejects_duplicate_ids() {
        let store = MemoryDocumentStore::new();
        store
            .insert_one(record("a", SourceType::Mood, vec![1.0, 0.0], 0))
            .await
            .unwrap();
        let err = store
            .insert_one(record("a", SourceType::Mood, vec![1.0, 0.0], 0))
            .await
            .unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::DuplicateKey);
    }

    #[tokio::test]
    async fn insert_many_is_all_or_nothing() {
        let store = MemoryDocumentStore::new();
        let batch = vec![
            record("a", SourceType::Mood, vec![1.0], 0),
            record("a", SourceType::Mood, vec![1.0], 0),
        ];
        assert!(store.insert_many(batch).await.is_err());
        assert_eq!(store.estimated_document_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn find_applies_sort_skip_and_limit() {
        let store = MemoryDocumentStore::new();
        for i in 0..5 {
            store
                .insert_one(record(&format!("r{}", i), SourceType::Mood, vec![1.0], i))
                .await
                .unwrap();
        }
        let options = FindOptions::new()
            .sort(SortSpec::parse("-created_at").unwrap())
            .skip(1)
            .limit(2);
        let ids: Vec<String> = store
            .find(&Filter::new(), options)
            .await
            .unwrap()
            .map(|r| r.id)
            .collect();
        // r0 is the newest
        assert_eq!(ids, vec!["r1".to_string(), "r2".to_string()]);
    }

    #[tokio::test]
    async fn ranked_find_orders_by_similarity() {
        let store = MemoryDocumentStore::new();
        store
            .insert_one(record("far", SourceType::Mood, vec![0.0, 1.0], 0))
            .await
            .unwrap();
        store
            .insert_one(record("near", SourceType::Mood, vec![1.0, 0.1], 0))
            .await
            .unwrap();
        store
            .insert_one(record("other-dim", SourceType::Mood, vec![1.0, 0.0, 0.0], 0))
            .await
            .unwrap();

        let results: Vec<ScoredRecord> = store
            .find_ranked(&Filter::new(), &[1.0, 0.0], 10)
            .await
            .unwrap()
            .collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].record.id, "near");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn update_and_delete_report_misses() {
        let store = MemoryDocumentStore::new();
        let update = RecordUpdate {
            vector: None,
            metadata: MetadataPatch::default(),
            updated_at: Utc::now(),
        };
        assert!(store
            .find_one_and_update(&Filter::by_id("missing"), update)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            store
                .delete_one(&Filter::by_id("missing"))
                .await
                .unwrap()
                .deleted_count,
            0
        );
    }

    #[tokio::test]
    async fn aggregate_groups_and_orders() {
        let store = MemoryDocumentStore::new();
        store
            .insert_one(record("a", SourceType::Mood, vec![1.0, 0.0], 0))
            .await
            .unwrap();
        store
            .insert_one(record("b", SourceType::Journal, vec![1.0], 0))
            .await
            .unwrap();
        store
            .insert_one(record("c", SourceType::Journal, vec![1.0], 0))
            .await
            .unwrap();

        let by_type = store
            .aggregate(GroupBy::new(Field::SourceType, GroupOrder::CountDescending))
            .await
            .unwrap();
        assert_eq!(by_type[0].key, FieldValue::Text("journal".into()));
        assert_eq!(by_type[0].count, 2);

        let by_dims = store
            .aggregate(GroupBy::new(Field::Dimensions, GroupOrder::KeyAscending))
            .await
            .unwrap();
        assert_eq!(by_dims[0].key, FieldValue::Integer(1));
        assert_eq!(by_dims[1].key, FieldValue::Integer(2));
    }

    #[tokio::test]
    async fn closed_store_refuses_calls() {
        let store = MemoryDocumentStore::new();
        store.close().await.unwrap();
        assert!(!store.health_check().await.unwrap());
        let err = store.count_documents(&Filter::new()).await.unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::NotConnected);
    }
}
