use crate::{
    config::PostgresConfig,
    error::{BackendError, BackendErrorKind, BackendResult, RecordStoreError, Result},
    models::{RecordMetadata, VectorRecord},
    storage::{
        query::{
            Condition, Field, FieldValue, Filter, FindOptions, GroupBy, GroupCount, GroupOrder,
            RecordUpdate, SortDirection,
        },
        traits::{Cursor, DeleteOutcome, DocumentStore, InsertManyResult, ScoredRecord},
    },
};

use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, Runtime};
use pgvector::Vector;
use serde_json::Value;
use tokio_postgres::{error::SqlState, types::ToSql, NoTls, Row};

type SqlParam = Box<dyn ToSql + Sync + Send>;

const RECORD_COLUMNS: &str = "id, vector, metadata";

pub struct PostgresDocumentStore {
    pool: Pool,
    table: String,
}

impl PostgresDocumentStore {
    pub async fn new(config: PostgresConfig, collection: &str) -> Result<Self> {
        if !is_valid_table_name(collection) {
            return Err(RecordStoreError::ConfigError(format!(
                "collection name '{}' is not a valid table name",
                collection
            )));
        }

        let mut cfg = Config::new();
        cfg.host = config.host;
        cfg.port = config.port;
        cfg.user = config.username;
        cfg.password = config.password;
        cfg.dbname = config.database;

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| RecordStoreError::ConfigError(format!("Failed to create pool: {}", e)))?;

        let storage = Self {
            pool,
            table: collection.to_string(),
        };
        storage
            .initialize_schema()
            .await
            .map_err(|e| RecordStoreError::store("connect", e))?;

        Ok(storage)
    }

    async fn client(&self) -> BackendResult<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| {
            BackendError::new(
                BackendErrorKind::Connection,
                format!("Failed to get connection: {}", e),
            )
        })
    }

    async fn initialize_schema(&self) -> BackendResult<()> {
        let client = self.client().await?;
        let table = &self.table;

        client
            .execute("CREATE EXTENSION IF NOT EXISTS vector", &[])
            .await
            .map_err(query_error("create vector extension"))?;

        client
            .execute(
                format!(
                    "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                vector VECTOR NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{{}}',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"
                )
                .as_str(),
                &[],
            )
            .await
            .map_err(query_error("create records table"))?;

        client
            .execute(
                format!(
                    "CREATE INDEX IF NOT EXISTS idx_{table}_user_id ON {table} ((metadata->>'user_id'))"
                )
                .as_str(),
                &[],
            )
            .await
            .map_err(query_error("create user index"))?;

        client
            .execute(
                format!("CREATE INDEX IF NOT EXISTS idx_{table}_created_at ON {table} (created_at)")
                    .as_str(),
                &[],
            )
            .await
            .map_err(query_error("create created_at index"))?;

        log::info!("PostgreSQL document store schema initialized for '{}'", table);
        Ok(())
    }

    async fn query(&self, sql: &str, builder: &SqlBuilder, context: &'static str) -> BackendResult<Vec<Row>> {
        let client = self.client().await?;
        log::debug!("{}: {}", context, sql);
        client
            .query(sql, &builder.refs())
            .await
            .map_err(query_error(context))
    }
}

fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Maps driver errors onto backend error codes by SQLSTATE.
fn query_error(context: &'static str) -> impl Fn(tokio_postgres::Error) -> BackendError {
    move |e| {
        let kind = match e.code() {
            Some(code) if *code == SqlState::UNIQUE_VIOLATION => BackendErrorKind::DuplicateKey,
            // pgvector raises data_exception for mismatched dimensions
            Some(code) if *code == SqlState::DATA_EXCEPTION => BackendErrorKind::InvalidDimension,
            _ => BackendErrorKind::Query,
        };
        BackendError::new(kind, format!("Failed to {}: {}", context, e))
    }
}

fn shape_error(e: impl std::fmt::Display) -> BackendError {
    BackendError::new(BackendErrorKind::UnexpectedShape, e.to_string())
}

/// LIMIT and OFFSET are BIGINT; a count past `i64::MAX` is refused rather than wrapped.
fn sql_count(value: usize, what: &str) -> BackendResult<i64> {
    i64::try_from(value).map_err(|_| {
        BackendError::new(
            BackendErrorKind::Query,
            format!("{} {} is out of range", what, value),
        )
    })
}

fn column(field: Field) -> &'static str {
    match field {
        Field::Id => "id",
        Field::UserId => "metadata->>'user_id'",
        Field::SourceType => "metadata->>'source_type'",
        Field::SourceId => "metadata->>'source_id'",
        Field::Tags => "metadata->'tags'",
        Field::ModelVersion => "metadata->>'model_version'",
        Field::Dimensions => "(metadata->>'dimensions')::bigint",
        Field::ConfidenceScore => "(metadata->>'confidence_score')::float8",
        Field::CreatedAt => "created_at",
        Field::UpdatedAt => "updated_at",
    }
}

fn param(value: &FieldValue) -> SqlParam {
    match value {
        FieldValue::Text(s) => Box::new(s.clone()),
        FieldValue::Integer(n) => Box::new(*n),
        FieldValue::Float(f) => Box::new(*f),
        FieldValue::Timestamp(t) => Box::new(*t),
    }
}

#[derive(Default)]
struct SqlBuilder {
    params: Vec<SqlParam>,
}

impl SqlBuilder {
    fn push(&mut self, value: SqlParam) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }

    fn refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect()
    }

    fn where_clause(&mut self, filter: &Filter) -> String {
        if filter.is_empty() {
            return "TRUE".to_string();
        }
        let parts: Vec<String> = filter
            .clauses()
            .iter()
            .map(|(field, condition)| self.condition(*field, condition))
            .collect();
        parts.join(" AND ")
    }

    fn condition(&mut self, field: Field, condition: &Condition) -> String {
        if field == Field::Tags {
            return self.tag_condition(condition);
        }
        let col = column(field);
        match condition {
            Condition::Equals(value) => format!("{} = {}", col, self.push(param(value))),
            Condition::AnyOf(values) if values.is_empty() => "FALSE".to_string(),
            Condition::AnyOf(values) => {
                let alternatives: Vec<String> = values
                    .iter()
                    .map(|v| format!("{} = {}", col, self.push(param(v))))
                    .collect();
                format!("({})", alternatives.join(" OR "))
            }
            Condition::Range { gte, lte } => self.range(col, gte.as_ref(), lte.as_ref()),
        }
    }

    fn tag_condition(&mut self, condition: &Condition) -> String {
        let col = column(Field::Tags);
        match condition {
            Condition::Equals(value) => format!("{} ? {}", col, self.push(param(value))),
            Condition::AnyOf(values) => {
                let tags: Vec<String> = values
                    .iter()
                    .filter_map(|v| v.as_text().map(str::to_string))
                    .collect();
                format!("{} ?| {}", col, self.push(Box::new(tags)))
            }
            Condition::Range { gte, lte } => format!(
                "EXISTS (SELECT 1 FROM jsonb_array_elements_text({}) AS tag(value) WHERE {})",
                col,
                self.range("tag.value", gte.as_ref(), lte.as_ref())
            ),
        }
    }

    fn range(&mut self, col: &str, gte: Option<&FieldValue>, lte: Option<&FieldValue>) -> String {
        let mut bounds = Vec::new();
        if let Some(low) = gte {
            bounds.push(format!("{} >= {}", col, self.push(param(low))));
        }
        if let Some(high) = lte {
            bounds.push(format!("{} <= {}", col, self.push(param(high))));
        }
        if bounds.is_empty() {
            "TRUE".to_string()
        } else {
            bounds.join(" AND ")
        }
    }
}

fn record_from_row(row: &Row) -> BackendResult<VectorRecord> {
    let id: String = row.try_get("id").map_err(shape_error)?;
    let vector: Vector = row.try_get("vector").map_err(shape_error)?;
    let metadata: Value = row.try_get("metadata").map_err(shape_error)?;
    let metadata: RecordMetadata = serde_json::from_value(metadata).map_err(|e| {
        BackendError::new(
            BackendErrorKind::Serialization,
            format!("Invalid metadata for record {}: {}", id, e),
        )
    })?;

    Ok(VectorRecord {
        id,
        vector: vector.to_vec(),
        metadata,
    })
}

fn metadata_value(metadata: &RecordMetadata) -> BackendResult<Value> {
    serde_json::to_value(metadata)
        .map_err(|e| BackendError::new(BackendErrorKind::Serialization, e.to_string()))
}

#[async_trait]
impl DocumentStore for PostgresDocumentStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn insert_one(&self, record: VectorRecord) -> BackendResult<String> {
        let client = self.client().await?;
        let metadata = metadata_value(&record.metadata)?;
        let vector = Vector::from(record.vector);

        client
            .execute(
                format!(
                    "INSERT INTO {} (id, vector, metadata, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5)",
                    self.table
                )
                .as_str(),
                &[
                    &record.id,
                    &vector,
                    &metadata,
                    &record.metadata.created_at,
                    &record.metadata.updated_at,
                ],
            )
            .await
            .map_err(query_error("insert record"))?;

        Ok(record.id)
    }

    async fn insert_many(&self, records: Vec<VectorRecord>) -> BackendResult<InsertManyResult> {
        if records.is_empty() {
            return Ok(InsertManyResult {
                inserted_count: 0,
                inserted_ids: Vec::new(),
            });
        }

        let mut builder = SqlBuilder::default();
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let metadata = metadata_value(&record.metadata)?;
            let created_at = record.metadata.created_at;
            let updated_at = record.metadata.updated_at;
            rows.push(format!(
                "({}, {}, {}, {}, {})",
                builder.push(Box::new(record.id)),
                builder.push(Box::new(Vector::from(record.vector))),
                builder.push(Box::new(metadata)),
                builder.push(Box::new(created_at)),
                builder.push(Box::new(updated_at)),
            ));
        }

        // Conflicting ids are skipped, so RETURNING reports exactly what was confirmed.
        let sql = format!(
            "INSERT INTO {} (id, vector, metadata, created_at, updated_at) VALUES {}
             ON CONFLICT (id) DO NOTHING RETURNING id",
            self.table,
            rows.join(", ")
        );
        let returned = self.query(&sql, &builder, "insert record batch").await?;

        let inserted_ids = returned
            .iter()
            .map(|row| row.try_get::<_, String>("id").map_err(shape_error))
            .collect::<BackendResult<Vec<_>>>()?;

        Ok(InsertManyResult {
            inserted_count: inserted_ids.len(),
            inserted_ids,
        })
    }

    async fn find_one(&self, filter: &Filter) -> BackendResult<Option<VectorRecord>> {
        let mut builder = SqlBuilder::default();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            RECORD_COLUMNS,
            self.table,
            builder.where_clause(filter)
        );
        let rows = self.query(&sql, &builder, "find record").await?;
        rows.first().map(record_from_row).transpose()
    }

    async fn find(
        &self,
        filter: &Filter,
        options: FindOptions,
    ) -> BackendResult<Cursor<VectorRecord>> {
        let mut builder = SqlBuilder::default();
        let mut sql = format!(
            "SELECT {} FROM {} WHERE {}",
            RECORD_COLUMNS,
            self.table,
            builder.where_clause(filter)
        );

        if let Some(sort) = options.sort {
            let direction = match sort.direction {
                SortDirection::Ascending => "ASC",
                SortDirection::Descending => "DESC",
            };
            sql.push_str(&format!(
                " ORDER BY {} {}, id ASC",
                column(sort.field),
                direction
            ));
        }
        if let Some(limit) = options.limit {
            let placeholder = builder.push(Box::new(sql_count(limit, "limit")?));
            sql.push_str(&format!(" LIMIT {}", placeholder));
        }
        if options.skip > 0 {
            let placeholder = builder.push(Box::new(sql_count(options.skip, "offset")?));
            sql.push_str(&format!(" OFFSET {}", placeholder));
        }

        let rows = self.query(&sql, &builder, "list records").await?;
        let records = rows
            .iter()
            .map(record_from_row)
            .collect::<BackendResult<Vec<_>>>()?;
        Ok(Cursor::new(records))
    }

    async fn find_ranked(
        &self,
        filter: &Filter,
        query: &[f32],
        limit: usize,
    ) -> BackendResult<Cursor<ScoredRecord>> {
        let mut builder = SqlBuilder::default();
        let query_param = builder.push(Box::new(Vector::from(query.to_vec())));
        let dims_param = builder.push(Box::new(query.len() as i32));
        let where_clause = builder.where_clause(filter);
        let limit_param = builder.push(Box::new(sql_count(limit, "limit")?));

        // Rows of another dimensionality cannot be compared with <=> and are excluded.
        let sql = format!(
            "SELECT {cols}, (1 - (vector <=> {q}))::real AS similarity
             FROM {table}
             WHERE vector_dims(vector) = {d} AND {w}
             ORDER BY vector <=> {q}
             LIMIT {l}",
            cols = RECORD_COLUMNS,
            q = query_param,
            table = self.table,
            d = dims_param,
            w = where_clause,
            l = limit_param,
        );

        let rows = self.query(&sql, &builder, "rank records").await?;
        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            results.push(ScoredRecord {
                record: record_from_row(row)?,
                score: row.try_get("similarity").map_err(shape_error)?,
            });
        }
        Ok(Cursor::new(results))
    }

    async fn find_one_and_update(
        &self,
        filter: &Filter,
        update: RecordUpdate,
    ) -> BackendResult<Option<VectorRecord>> {
        let mut patch = serde_json::to_value(&update.metadata)
            .map_err(|e| BackendError::new(BackendErrorKind::Serialization, e.to_string()))?;
        if let (Value::Object(fields), Some(vector)) = (&mut patch, &update.vector) {
            fields.insert("dimensions".to_string(), Value::from(vector.len()));
        }

        let mut builder = SqlBuilder::default();
        let where_clause = builder.where_clause(filter);
        // Right-hand column references see the pre-update row.
        let stamp = format!(
            "GREATEST({}, updated_at + interval '{} microsecond')",
            builder.push(Box::new(update.updated_at)),
            RecordUpdate::MIN_TIMESTAMP_STEP_MICROS
        );
        let mut assignments = vec![
            format!(
                "metadata = (metadata || {}::jsonb) || jsonb_build_object('updated_at', to_jsonb({}))",
                builder.push(Box::new(patch)),
                stamp
            ),
            format!("updated_at = {}", stamp),
        ];
        if let Some(vector) = update.vector {
            assignments.push(format!(
                "vector = {}",
                builder.push(Box::new(Vector::from(vector)))
            ));
        }

        let sql = format!(
            "UPDATE {table} SET {set}
             WHERE id = (SELECT id FROM {table} WHERE {w} LIMIT 1)
             RETURNING {cols}",
            table = self.table,
            set = assignments.join(", "),
            w = where_clause,
            cols = RECORD_COLUMNS,
        );

        let rows = self.query(&sql, &builder, "update record").await?;
        rows.first().map(record_from_row).transpose()
    }

    async fn delete_one(&self, filter: &Filter) -> BackendResult<DeleteOutcome> {
        let mut builder = SqlBuilder::default();
        let sql = format!(
            "DELETE FROM {table} WHERE id = (SELECT id FROM {table} WHERE {w} LIMIT 1)",
            table = self.table,
            w = builder.where_clause(filter),
        );

        let client = self.client().await?;
        let deleted_count = client
            .execute(sql.as_str(), &builder.refs())
            .await
            .map_err(query_error("delete record"))?;

        Ok(DeleteOutcome { deleted_count })
    }

    async fn count_documents(&self, filter: &Filter) -> BackendResult<u64> {
        let mut builder = SqlBuilder::default();
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            self.table,
            builder.where_clause(filter)
        );
        let rows = self.query(&sql, &builder, "count records").await?;
        let count: i64 = rows
            .first()
            .ok_or_else(|| shape_error("count query returned no rows"))?
            .try_get(0)
            .map_err(shape_error)?;
        Ok(count.max(0) as u64)
    }

    async fn estimated_document_count(&self) -> BackendResult<u64> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT reltuples::bigint FROM pg_class WHERE relname = $1",
                &[&self.table],
            )
            .await
            .map_err(query_error("estimate record count"))?;

        let estimate = match row {
            Some(row) => row.try_get::<_, i64>(0).map_err(shape_error)?,
            None => -1,
        };
        // reltuples is -1 until the table has been analyzed
        if estimate < 0 {
            return self.count_documents(&Filter::new()).await;
        }
        Ok(estimate as u64)
    }

    async fn aggregate(&self, group: GroupBy) -> BackendResult<Vec<GroupCount>> {
        let (key, source) = match group.field {
            Field::Tags => (
                "tag.value".to_string(),
                format!(
                    "{}, jsonb_array_elements_text(metadata->'tags') AS tag(value)",
                    self.table
                ),
            ),
            field => (column(field).to_string(), self.table.clone()),
        };
        let order = match group.order {
            GroupOrder::CountDescending => "total DESC, 1 ASC",
            GroupOrder::KeyAscending => "1 ASC",
        };
        let sql = format!(
            "SELECT {} AS key, COUNT(*) AS total FROM {} GROUP BY 1 ORDER BY {}",
            key, source, order
        );

        let rows = self
            .query(&sql, &SqlBuilder::default(), "aggregate records")
            .await?;

        let mut groups = Vec::with_capacity(rows.len());
        for row in &rows {
            let key = match group.field {
                Field::Dimensions => row
                    .try_get::<_, Option<i64>>("key")
                    .map_err(shape_error)?
                    .map(FieldValue::Integer),
                Field::ConfidenceScore => row
                    .try_get::<_, Option<f64>>("key")
                    .map_err(shape_error)?
                    .map(FieldValue::Float),
                Field::CreatedAt | Field::UpdatedAt => row
                    .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>("key")
                    .map_err(shape_error)?
                    .map(FieldValue::Timestamp),
                _ => row
                    .try_get::<_, Option<String>>("key")
                    .map_err(shape_error)?
                    .map(FieldValue::Text),
            };
            let total: i64 = row.try_get("total").map_err(shape_error)?;
            if let Some(key) = key {
                groups.push(GroupCount {
                    key,
                    count: total.max(0) as u64,
                });
            }
        }
        Ok(groups)
    }

    async fn health_check(&self) -> BackendResult<bool> {
        let client = self.client().await?;
        client
            .execute("SELECT 1", &[])
            .await
            .map_err(query_error("run health check"))?;
        Ok(true)
    }

    async fn close(&self) -> BackendResult<()> {
        self.pool.close();
        log::info!("PostgreSQL connection pool closed");
        Ok(())
    }
}
