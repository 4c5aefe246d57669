//! Record management over a [`DocumentStore`].
//!
//! Every operation validates its input before touching the store, issues one logical store call
//! (two for listing), and wraps backend failures with the name of the operation that failed.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    config::{Config, LimitsConfig},
    error::{BackendError, BackendErrorKind, RecordStoreError, Result},
    logger,
    models::{
        BatchCreateResult, DeleteResult, DimensionCount, ListQuery, NewVectorRecord, Page,
        PageInfo, RecordChanges, SimilarRecord, SimilarityQuery, SimilarityResponse, SourceType,
        SourceTypeCount, StatisticsReport, VectorRecord, DEFAULT_SORT,
    },
    storage::{
        DocumentStore, Field, FieldValue, Filter, FindOptions, GroupBy, GroupCount, GroupOrder,
        RecordUpdate, SortSpec,
    },
    validation::{self, RecordValidator, ValidationErrors},
    vector_math,
};

/// Records are built in chunks of this size during batch creation.
const BUILD_CHUNK_SIZE: usize = 25;

fn store_error(operation: &'static str) -> impl FnOnce(BackendError) -> RecordStoreError {
    move |source| {
        log::error!("❌ Store call failed during {}: {}", operation, source);
        RecordStoreError::store(operation, source)
    }
}

fn build_record(item: &NewVectorRecord) -> Result<VectorRecord> {
    let metadata = validation::metadata_from_input(&item.metadata, item.vector.len(), Utc::now())?;
    Ok(VectorRecord {
        id: Uuid::new_v4().to_string(),
        vector: item.vector.clone(),
        metadata,
    })
}

fn parse_source_type(field: &str, value: &str) -> Result<SourceType> {
    value
        .parse()
        .map_err(|message| ValidationErrors::single(field, message).into())
}

#[derive(Clone)]
pub struct VectorRecordService {
    store: Arc<dyn DocumentStore>,
    validator: RecordValidator,
    collection_name: String,
}

impl VectorRecordService {
    pub fn new(store: Arc<dyn DocumentStore>, config: &Config) -> Self {
        Self {
            store,
            validator: RecordValidator::new(config.limits),
            collection_name: config.collection_name.clone(),
        }
    }

    pub fn limits(&self) -> &LimitsConfig {
        self.validator.limits()
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    pub async fn create(&self, record: NewVectorRecord) -> Result<VectorRecord> {
        self.validator.validate_new(&record)?;
        let record = build_record(&record)?;

        self.store
            .insert_one(record.clone())
            .await
            .map_err(store_error("create"))?;

        log::info!(
            "Created vector record {} ({} dimensions, source_type={})",
            record.id,
            record.metadata.dimensions,
            record.metadata.source_type
        );
        Ok(record)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<VectorRecord> {
        log::debug!("Fetching vector record {}", id);
        self.store
            .find_one(&Filter::by_id(id))
            .await
            .map_err(store_error("get_by_id"))?
            .ok_or_else(|| RecordStoreError::NotFound(id.to_string()))
    }

    /// Shallow-merges `changes` into the stored record. `updated_at` always moves forward, by at
    /// least a microsecond, even if the clock has not.
    pub async fn update(&self, id: &str, changes: RecordChanges) -> Result<VectorRecord> {
        self.validator.validate_changes(&changes)?;

        let metadata = changes
            .metadata
            .as_ref()
            .map(validation::patch_from_input)
            .transpose()?
            .unwrap_or_default();
        let update = RecordUpdate {
            vector: changes.vector,
            metadata,
            updated_at: Utc::now(),
        };

        let record = self
            .store
            .find_one_and_update(&Filter::by_id(id), update)
            .await
            .map_err(store_error("update"))?
            .ok_or_else(|| RecordStoreError::NotFound(id.to_string()))?;

        log::info!("Updated vector record {}", id);
        Ok(record)
    }

    pub async fn delete(&self, id: &str) -> Result<DeleteResult> {
        let outcome = self
            .store
            .delete_one(&Filter::by_id(id))
            .await
            .map_err(store_error("delete"))?;

        if outcome.deleted_count == 0 {
            return Err(RecordStoreError::NotFound(id.to_string()));
        }

        log::info!("Deleted vector record {}", id);
        Ok(DeleteResult {
            id: id.to_string(),
            deleted: true,
        })
    }

    /// One page of records plus pagination info.
    ///
    /// The page and the total come from two separate store calls, so under concurrent writes
    /// they can disagree.
    pub async fn list(&self, query: ListQuery) -> Result<Page<VectorRecord>> {
        self.validator.validate_list_query(&query)?;

        let mut filter = Filter::new();
        if let Some(user_id) = &query.user_id {
            filter = filter.eq(Field::UserId, user_id.as_str());
        }
        if let Some(source_type) = &query.source_type {
            let source_type = parse_source_type("source_type", source_type)?;
            filter = filter.eq(Field::SourceType, source_type.as_str());
        }

        let token = query.sort.as_deref().unwrap_or(DEFAULT_SORT);
        let sort = SortSpec::parse(token).ok_or_else(|| {
            RecordStoreError::from(ValidationErrors::single(
                "sort",
                format!("unknown sort field '{}'", token),
            ))
        })?;
        let options = FindOptions::new()
            .sort(sort)
            .skip(query.skip())
            .limit(query.limit);

        let (cursor, total_items) = futures::try_join!(
            self.store.find(&filter, options),
            self.store.count_documents(&filter)
        )
        .map_err(store_error("list"))?;

        let items: Vec<VectorRecord> = cursor.collect();
        log::debug!(
            "Listed {} of {} vector records (page {})",
            items.len(),
            total_items,
            query.page
        );

        Ok(Page {
            items,
            pagination: PageInfo::new(query.page, query.limit, total_items),
        })
    }

    /// Creates every item with one store call.
    ///
    /// When the store confirms fewer inserts than were submitted, the counts and ids are
    /// returned exactly as the store reported them and `records` keeps only the confirmed ones.
    pub async fn batch_create(&self, items: Vec<NewVectorRecord>) -> Result<BatchCreateResult> {
        self.validator.validate_batch(&items)?;
        let _timer = logger::timer("batch_create");

        let records = vector_math::batch_process(&items, build_record, BUILD_CHUNK_SIZE)
            .into_iter()
            .collect::<Result<Vec<_>>>()?;
        let submitted = records.len();

        let outcome = self
            .store
            .insert_many(records.clone())
            .await
            .map_err(store_error("batch_create"))?;

        let records = if outcome.inserted_count == submitted {
            records
        } else {
            log::warn!(
                "⚠️  Batch insert confirmed {} of {} records",
                outcome.inserted_count,
                submitted
            );
            let confirmed: HashSet<&str> =
                outcome.inserted_ids.iter().map(String::as_str).collect();
            records
                .into_iter()
                .filter(|r| confirmed.contains(r.id.as_str()))
                .collect()
        };

        log::info!("Batch created {} vector records", outcome.inserted_count);
        Ok(BatchCreateResult {
            inserted_count: outcome.inserted_count,
            inserted_ids: outcome.inserted_ids,
            records,
        })
    }

    /// Nearest records to the query vector, most similar first.
    ///
    /// Ranking is the store's; results keep the order the store returned them in.
    pub async fn find_similar(&self, query: SimilarityQuery) -> Result<SimilarityResponse> {
        self.validator.validate_similarity_query(&query)?;
        let _timer = logger::timer("find_similar");

        let mut filter = Filter::new();
        if let Some(user_id) = &query.user_id {
            filter = filter.eq(Field::UserId, user_id.as_str());
        }
        if let Some(source_type) = &query.source_type {
            let source_type = parse_source_type("source_type", source_type)?;
            filter = filter.eq(Field::SourceType, source_type.as_str());
        }
        if let Some(source_id) = &query.source_id {
            filter = filter.eq(Field::SourceId, source_id.as_str());
        }
        if let Some(tags) = &query.tags {
            filter = filter.any_of(Field::Tags, tags.iter().map(String::as_str));
        }
        filter = filter.range(
            Field::CreatedAt,
            query.created_after.map(FieldValue::from),
            query.created_before.map(FieldValue::from),
        );

        let limit = query
            .limit
            .unwrap_or(self.validator.limits().default_search_limit);

        let results: Vec<SimilarRecord> = self
            .store
            .find_ranked(&filter, &query.vector, limit)
            .await
            .map_err(store_error("find_similar"))?
            .map(|scored| SimilarRecord {
                id: scored.record.id,
                vector: scored.record.vector,
                metadata: scored.record.metadata,
                similarity_score: scored.score,
            })
            .collect();

        log::debug!(
            "Similarity search returned {} results (limit {})",
            results.len(),
            limit
        );

        Ok(SimilarityResponse {
            query_vector_dimensions: query.vector.len(),
            total_results: results.len(),
            results,
        })
    }

    pub async fn statistics(&self) -> Result<StatisticsReport> {
        let (total_vectors, by_source_type, by_dimensions) = futures::try_join!(
            self.store.estimated_document_count(),
            self.store
                .aggregate(GroupBy::new(Field::SourceType, GroupOrder::CountDescending)),
            self.store
                .aggregate(GroupBy::new(Field::Dimensions, GroupOrder::KeyAscending)),
        )
        .map_err(store_error("statistics"))?;

        let source_type_distribution = by_source_type
            .into_iter()
            .map(source_type_count)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_error("statistics"))?;
        let dimension_distribution = by_dimensions
            .into_iter()
            .map(dimension_count)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(store_error("statistics"))?;

        Ok(StatisticsReport {
            total_vectors,
            source_type_distribution,
            dimension_distribution,
            collection_name: self.collection_name.clone(),
        })
    }
}

fn unexpected_group(group: &GroupCount) -> BackendError {
    BackendError::new(
        BackendErrorKind::UnexpectedShape,
        format!("unexpected group key {:?}", group.key),
    )
}

fn source_type_count(group: GroupCount) -> std::result::Result<SourceTypeCount, BackendError> {
    let source_type = group
        .key
        .as_text()
        .and_then(|key| key.parse::<SourceType>().ok())
        .ok_or_else(|| unexpected_group(&group))?;
    Ok(SourceTypeCount {
        source_type,
        count: group.count,
    })
}

fn dimension_count(group: GroupCount) -> std::result::Result<DimensionCount, BackendError> {
    let dimensions = group
        .key
        .as_integer()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| unexpected_group(&group))?;
    Ok(DimensionCount {
        dimensions,
        count: group.count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MetadataInput;
    use crate::storage::{
        Cursor, DeleteOutcome, InsertManyResult, MemoryDocumentStore, ScoredRecord,
    };
    use crate::error::BackendResult;
    use async_trait::async_trait;

    fn service() -> VectorRecordService {
        VectorRecordService::new(Arc::new(MemoryDocumentStore::new()), &Config::new())
    }

    fn embedding(dims: usize, seed: f32) -> Vec<f32> {
        (0..dims).map(|i| ((i as f32) * 0.01 + seed).sin()).collect()
    }

    fn new_record(user: &str, source_type: &str, seed: f32) -> NewVectorRecord {
        NewVectorRecord::new(
            embedding(384, seed),
            MetadataInput::new(source_type, format!("src-{}", seed), user),
        )
    }

    #[tokio::test]
    async fn create_assigns_identity_and_timestamps() {
        let service = service();
        let record = service
            .create(new_record("user-1", "journal", 0.5))
            .await
            .unwrap();

        assert!(Uuid::parse_str(&record.id).is_ok());
        assert_eq!(record.metadata.dimensions, 384);
        assert_eq!(record.metadata.created_at, record.metadata.updated_at);
        assert_eq!(record.metadata.model_version, "unknown");
    }

    #[tokio::test]
    async fn invalid_create_never_reaches_store() {
        let service = service();
        let bad = NewVectorRecord::new(vec![0.1; 10], MetadataInput::default());
        let err = service.create(bad).await.unwrap_err();

        match err {
            RecordStoreError::ValidationError(errors) => assert!(errors.len() >= 4),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(service.statistics().await.unwrap().total_vectors, 0);
    }

    #[tokio::test]
    async fn update_merges_metadata_and_replaces_vector() {
        let service = service();
        let created = service
            .create(new_record("user-1", "mood", 1.0))
            .await
            .unwrap();

        let changes = RecordChanges {
            vector: Some(vec![0.25; 12]),
            metadata: Some(MetadataInput {
                source_type: Some("therapy".into()),
                ..Default::default()
            }),
        };
        let updated = service.update(&created.id, changes).await.unwrap();

        assert_eq!(updated.vector.len(), 12);
        assert_eq!(updated.metadata.dimensions, 12);
        assert_eq!(updated.metadata.source_type, SourceType::Therapy);
        assert_eq!(updated.metadata.user_id, "user-1");
        assert_eq!(updated.metadata.created_at, created.metadata.created_at);
        assert!(updated.metadata.updated_at > created.metadata.updated_at);
    }

    #[tokio::test]
    async fn missing_ids_are_not_found() {
        let service = service();
        assert!(matches!(
            service.get_by_id("nope").await,
            Err(RecordStoreError::NotFound(_))
        ));
        assert!(matches!(
            service.delete("nope").await,
            Err(RecordStoreError::NotFound(_))
        ));
        let changes = RecordChanges {
            vector: Some(vec![1.0; 4]),
            metadata: None,
        };
        assert!(matches!(
            service.update("nope", changes).await,
            Err(RecordStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_filters_by_user_and_source_type() {
        let service = service();
        for i in 0..4 {
            service
                .create(new_record("alice", "journal", i as f32))
                .await
                .unwrap();
        }
        service
            .create(new_record("alice", "mood", 9.0))
            .await
            .unwrap();
        service
            .create(new_record("bob", "journal", 10.0))
            .await
            .unwrap();

        let page = service
            .list(
                ListQuery::new(1, 10)
                    .with_user("alice")
                    .with_source_type("journal"),
            )
            .await
            .unwrap();
        assert_eq!(page.items.len(), 4);
        assert_eq!(page.pagination.total_items, 4);
        assert!(page
            .items
            .iter()
            .all(|r| r.metadata.user_id == "alice" && r.metadata.source_type == SourceType::Journal));
    }

    #[tokio::test]
    async fn list_defaults_to_newest_first() {
        let service = service();
        let first = service.create(new_record("u", "journal", 1.0)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = service.create(new_record("u", "journal", 2.0)).await.unwrap();

        let page = service.list(ListQuery::new(1, 10)).await.unwrap();
        assert_eq!(page.items[0].id, second.id);
        assert_eq!(page.items[1].id, first.id);

        let ascending = service
            .list(ListQuery::new(1, 10).with_sort("created_at"))
            .await
            .unwrap();
        assert_eq!(ascending.items[0].id, first.id);
    }

    #[tokio::test]
    async fn list_rejects_bad_paging() {
        let service = service();
        let err = service.list(ListQuery::new(0, 500)).await.unwrap_err();
        match err {
            RecordStoreError::ValidationError(errors) => {
                assert!(errors.has_field("page"));
                assert!(errors.has_field("limit"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn find_similar_applies_filters() {
        let service = service();
        let target = service
            .create(
                NewVectorRecord::new(
                    embedding(384, 3.0),
                    MetadataInput::new("meditation", "s-1", "alice").with_tags(["calm"]),
                ),
            )
            .await
            .unwrap();
        service
            .create(NewVectorRecord::new(
                embedding(384, 3.0),
                MetadataInput::new("meditation", "s-2", "bob").with_tags(["calm"]),
            ))
            .await
            .unwrap();

        let response = service
            .find_similar(
                SimilarityQuery::new(embedding(384, 3.0))
                    .with_user("alice")
                    .with_tags(["calm", "focus"]),
            )
            .await
            .unwrap();

        assert_eq!(response.total_results, 1);
        assert_eq!(response.results[0].id, target.id);
        assert!((response.results[0].similarity_score - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn find_similar_respects_created_range() {
        let service = service();
        service.create(new_record("u", "activity", 1.0)).await.unwrap();
        let cutoff = Utc::now() + chrono::Duration::hours(1);

        let response = service
            .find_similar(
                SimilarityQuery::new(embedding(384, 1.0)).created_between(Some(cutoff), None),
            )
            .await
            .unwrap();
        assert_eq!(response.total_results, 0);
    }

    #[tokio::test]
    async fn large_magnitude_records_still_rank_as_identical() {
        let service = service();
        let created = service
            .create(NewVectorRecord::new(
                vec![1e20; 128],
                MetadataInput::new("journal", "big", "u"),
            ))
            .await
            .unwrap();

        let response = service
            .find_similar(SimilarityQuery::new(vec![1.0; 128]))
            .await
            .unwrap();
        assert_eq!(response.results[0].id, created.id);
        assert!((response.results[0].similarity_score - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn statistics_groups_by_type_and_dimension() {
        let service = service();
        service.create(new_record("u", "journal", 1.0)).await.unwrap();
        service.create(new_record("u", "journal", 2.0)).await.unwrap();
        service
            .create(NewVectorRecord::new(
                embedding(128, 1.0),
                MetadataInput::new("mood", "m-1", "u"),
            ))
            .await
            .unwrap();

        let stats = service.statistics().await.unwrap();
        assert_eq!(stats.total_vectors, 3);
        assert_eq!(stats.collection_name, crate::config::DEFAULT_COLLECTION_NAME);
        assert_eq!(
            stats.source_type_distribution[0],
            SourceTypeCount {
                source_type: SourceType::Journal,
                count: 2
            }
        );
        assert_eq!(
            stats.dimension_distribution,
            vec![
                DimensionCount {
                    dimensions: 128,
                    count: 1
                },
                DimensionCount {
                    dimensions: 384,
                    count: 2
                },
            ]
        );
    }

    /// Confirms only the first record of any batch and fails everything else.
    struct PartialBatchStore;

    fn unavailable() -> BackendError {
        BackendError::new(BackendErrorKind::Connection, "backend unavailable")
    }

    #[async_trait]
    impl DocumentStore for PartialBatchStore {
        fn backend_name(&self) -> &'static str {
            "partial"
        }
        async fn insert_one(&self, _record: VectorRecord) -> BackendResult<String> {
            Err(unavailable())
        }
        async fn insert_many(&self, records: Vec<VectorRecord>) -> BackendResult<InsertManyResult> {
            Ok(InsertManyResult {
                inserted_count: 1,
                inserted_ids: vec![records[0].id.clone()],
            })
        }
        async fn find_one(&self, _filter: &Filter) -> BackendResult<Option<VectorRecord>> {
            Err(unavailable())
        }
        async fn find(
            &self,
            _filter: &Filter,
            _options: FindOptions,
        ) -> BackendResult<Cursor<VectorRecord>> {
            Err(unavailable())
        }
        async fn find_ranked(
            &self,
            _filter: &Filter,
            _query: &[f32],
            _limit: usize,
        ) -> BackendResult<Cursor<ScoredRecord>> {
            Err(unavailable())
        }
        async fn find_one_and_update(
            &self,
            _filter: &Filter,
            _update: RecordUpdate,
        ) -> BackendResult<Option<VectorRecord>> {
            Err(unavailable())
        }
        async fn delete_one(&self, _filter: &Filter) -> BackendResult<DeleteOutcome> {
            Err(unavailable())
        }
        async fn count_documents(&self, _filter: &Filter) -> BackendResult<u64> {
            Err(unavailable())
        }
        async fn estimated_document_count(&self) -> BackendResult<u64> {
            Err(unavailable())
        }
        async fn aggregate(&self, _group: GroupBy) -> BackendResult<Vec<GroupCount>> {
            Ok(vec![GroupCount {
                key: FieldValue::Text("podcast".into()),
                count: 1,
            }])
        }
        async fn health_check(&self) -> BackendResult<bool> {
            Ok(true)
        }
    }

    fn partial_service() -> VectorRecordService {
        VectorRecordService::new(Arc::new(PartialBatchStore), &Config::new())
    }

    #[tokio::test]
    async fn partial_batch_is_reported_as_is() {
        let items = vec![
            new_record("u", "journal", 1.0),
            new_record("u", "journal", 2.0),
            new_record("u", "journal", 3.0),
        ];
        let result = partial_service().batch_create(items).await.unwrap();

        assert_eq!(result.inserted_count, 1);
        assert_eq!(result.inserted_ids.len(), 1);
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0].id, result.inserted_ids[0]);
    }

    #[tokio::test]
    async fn store_failures_carry_operation_name() {
        let err = partial_service().get_by_id("x").await.unwrap_err();
        match err {
            RecordStoreError::StoreError { operation, source } => {
                assert_eq!(operation, "get_by_id");
                assert_eq!(source.kind, BackendErrorKind::Connection);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!partial_service()
            .create(new_record("u", "journal", 1.0))
            .await
            .unwrap_err()
            .is_client_error());
    }

    #[tokio::test]
    async fn out_of_bounds_search_vector_never_reaches_store() {
        for len in [50, 4097] {
            let err = partial_service()
                .find_similar(SimilarityQuery::new(vec![0.3; len]))
                .await
                .unwrap_err();
            match err {
                RecordStoreError::ValidationError(errors) => assert!(errors.has_field("vector")),
                other => panic!("unexpected error for {} dims: {:?}", len, other),
            }
        }
    }

    #[tokio::test]
    async fn oversized_update_vector_never_reaches_store() {
        let changes = RecordChanges {
            vector: Some(vec![0.3; 4097]),
            metadata: None,
        };
        match partial_service().update("any", changes).await.unwrap_err() {
            RecordStoreError::ValidationError(errors) => assert!(errors.has_field("vector")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn overflowing_page_is_rejected_before_store() {
        let err = partial_service()
            .list(ListQuery::new(usize::MAX, 10))
            .await
            .unwrap_err();
        match err {
            RecordStoreError::ValidationError(errors) => assert!(errors.has_field("page")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unexpected_aggregate_shape_is_a_store_error() {
        let err = partial_service().statistics().await.unwrap_err();
        assert!(matches!(
            err,
            RecordStoreError::StoreError {
                operation: "statistics",
                ..
            }
        ));
    }
}
