use crate::{
    error::BackendResult,
    models::VectorRecord,
    storage::query::{Filter, FindOptions, GroupBy, GroupCount, RecordUpdate},
};
use async_trait::async_trait;

/// Document-collection capability the record service is written against.
///
/// Every call is one logical operation on the backend. Nothing here is transactional across
/// calls.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn insert_one(&self, record: VectorRecord) -> BackendResult<String>;

    /// One backend call for the whole batch. `inserted_count` reports what the backend
    /// confirmed, which may be fewer than submitted.
    async fn insert_many(&self, records: Vec<VectorRecord>) -> BackendResult<InsertManyResult>;

    async fn find_one(&self, filter: &Filter) -> BackendResult<Option<VectorRecord>>;

    async fn find(
        &self,
        filter: &Filter,
        options: FindOptions,
    ) -> BackendResult<Cursor<VectorRecord>>;

    /// Vector-ranked find. Results come back in the backend's ranking order, most similar
    /// first, each with its similarity score.
    async fn find_ranked(
        &self,
        filter: &Filter,
        query: &[f32],
        limit: usize,
    ) -> BackendResult<Cursor<ScoredRecord>>;

    /// Applies `update` to the first match and returns the document as it is after the update.
    async fn find_one_and_update(
        &self,
        filter: &Filter,
        update: RecordUpdate,
    ) -> BackendResult<Option<VectorRecord>>;

    async fn delete_one(&self, filter: &Filter) -> BackendResult<DeleteOutcome>;

    async fn count_documents(&self, filter: &Filter) -> BackendResult<u64>;

    /// Fast, possibly stale, total count.
    async fn estimated_document_count(&self) -> BackendResult<u64>;

    async fn aggregate(&self, group: GroupBy) -> BackendResult<Vec<GroupCount>>;

    async fn health_check(&self) -> BackendResult<bool>;

    async fn close(&self) -> BackendResult<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertManyResult {
    pub inserted_count: usize,
    pub inserted_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub record: VectorRecord,
    pub score: f32,
}

/// Forward-only, finite sequence of results from a single store call.
#[derive(Debug)]
pub struct Cursor<T> {
    inner: std::vec::IntoIter<T>,
}

impl<T> Cursor<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            inner: items.into_iter(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.inner.len()
    }
}

impl<T> From<Vec<T>> for Cursor<T> {
    fn from(items: Vec<T>) -> Self {
        Cursor::new(items)
    }
}

impl<T> Iterator for Cursor<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> ExactSizeIterator for Cursor<T> {}
