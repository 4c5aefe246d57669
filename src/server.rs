//! HTTP surface over [`VectorRecordService`].
//!
//! Every response uses the `{ "success": bool, "data" | "error" }` envelope.

use std::sync::Arc;

use actix_web::{
    dev::Server,
    error::{JsonPayloadError, QueryPayloadError},
    http::StatusCode,
    web, App, HttpRequest, HttpResponse, HttpServer, ResponseError,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    config::LimitsConfig,
    error::RecordStoreError,
    models::{ListQuery, MetadataInput, NewVectorRecord, RecordChanges, SimilarityQuery},
    service::VectorRecordService,
    storage::StoreClient,
    validation::ValidationErrors,
    vector_math,
};

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

pub struct AppState {
    pub service: VectorRecordService,
    pub client: Arc<StoreClient>,
}

impl AppState {
    pub fn new(service: VectorRecordService, client: Arc<StoreClient>) -> Self {
        Self { service, client }
    }
}

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    data: T,
}

fn respond<T: Serialize>(status: StatusCode, data: T) -> HttpResponse {
    HttpResponse::build(status).json(Envelope {
        success: true,
        data,
    })
}

impl ResponseError for RecordStoreError {
    fn status_code(&self) -> StatusCode {
        match self {
            RecordStoreError::ValidationError(_) | RecordStoreError::MathError(_) => {
                StatusCode::BAD_REQUEST
            }
            RecordStoreError::NotFound(_) => StatusCode::NOT_FOUND,
            RecordStoreError::StoreError { .. } | RecordStoreError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error = match self {
            RecordStoreError::ValidationError(errors) => json!({
                "code": "validation_error",
                "message": "Validation failed",
                "details": errors.errors,
            }),
            RecordStoreError::MathError(e) => json!({
                "code": "validation_error",
                "message": "Invalid vector",
                "details": [{ "field": "vector", "message": e.to_string() }],
            }),
            RecordStoreError::NotFound(id) => json!({
                "code": "not_found",
                "message": format!("Vector record {} not found", id),
            }),
            RecordStoreError::StoreError { operation, source } => json!({
                "code": "store_error",
                "message": format!("Storage failure during {}", operation),
                "kind": source.kind.as_str(),
            }),
            RecordStoreError::ConfigError(message) => {
                log::error!("❌ Configuration error while serving request: {}", message);
                json!({
                    "code": "config_error",
                    "message": "Service is misconfigured",
                })
            }
        };

        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": error,
        }))
    }
}

fn parse_vector(
    field: &str,
    value: &Value,
    limits: &LimitsConfig,
) -> Result<Vec<f32>, ValidationErrors> {
    vector_math::vector_from_json(value, None, limits.max_dimensions)
        .map_err(|e| ValidationErrors::single(field, e.to_string()))
}

#[derive(Debug, Deserialize)]
struct CreateBody {
    #[serde(default)]
    vector: Value,
    #[serde(default)]
    metadata: MetadataInput,
}

#[derive(Debug, Deserialize)]
struct UpdateBody {
    #[serde(default)]
    vector: Option<Value>,
    #[serde(default)]
    metadata: Option<MetadataInput>,
}

#[derive(Debug, Deserialize)]
struct BatchBody {
    #[serde(default)]
    items: Vec<CreateBody>,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    page: Option<usize>,
    limit: Option<usize>,
    user_id: Option<String>,
    source_type: Option<String>,
    sort: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    #[serde(default)]
    vector: Value,
    limit: Option<usize>,
    user_id: Option<String>,
    source_type: Option<String>,
    source_id: Option<String>,
    tags: Option<Vec<String>>,
    created_after: Option<DateTime<Utc>>,
    created_before: Option<DateTime<Utc>>,
}

async fn create_vector(
    state: web::Data<AppState>,
    body: web::Json<CreateBody>,
) -> Result<HttpResponse, RecordStoreError> {
    let body = body.into_inner();
    let vector = parse_vector("vector", &body.vector, state.service.limits())?;
    let record = state
        .service
        .create(NewVectorRecord::new(vector, body.metadata))
        .await?;
    Ok(respond(StatusCode::CREATED, record))
}

async fn get_vector(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, RecordStoreError> {
    let record = state.service.get_by_id(&id).await?;
    Ok(respond(StatusCode::OK, record))
}

async fn update_vector(
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<UpdateBody>,
) -> Result<HttpResponse, RecordStoreError> {
    let body = body.into_inner();
    let vector = body
        .vector
        .as_ref()
        .map(|v| parse_vector("vector", v, state.service.limits()))
        .transpose()?;
    let changes = RecordChanges {
        vector,
        metadata: body.metadata,
    };
    let record = state.service.update(&id, changes).await?;
    Ok(respond(StatusCode::OK, record))
}

async fn delete_vector(
    state: web::Data<AppState>,
    id: web::Path<String>,
) -> Result<HttpResponse, RecordStoreError> {
    let result = state.service.delete(&id).await?;
    Ok(respond(StatusCode::OK, result))
}

async fn list_vectors(
    state: web::Data<AppState>,
    params: web::Query<ListParams>,
) -> Result<HttpResponse, RecordStoreError> {
    let params = params.into_inner();
    let limits = state.service.limits();
    let query = ListQuery {
        page: params.page.unwrap_or(1),
        limit: params.limit.unwrap_or(limits.default_page_size),
        user_id: params.user_id,
        source_type: params.source_type,
        sort: params.sort,
    };
    let page = state.service.list(query).await?;
    Ok(respond(StatusCode::OK, page))
}

async fn batch_create_vectors(
    state: web::Data<AppState>,
    body: web::Json<BatchBody>,
) -> Result<HttpResponse, RecordStoreError> {
    let limits = state.service.limits();
    let mut errors = ValidationErrors::new();
    let mut items = Vec::with_capacity(body.items.len());

    for (index, item) in body.into_inner().items.into_iter().enumerate() {
        match parse_vector(&format!("items[{}].vector", index), &item.vector, limits) {
            Ok(vector) => items.push(NewVectorRecord::new(vector, item.metadata)),
            Err(e) => errors.errors.extend(e.errors),
        }
    }
    if !errors.is_empty() {
        return Err(errors.into());
    }

    let result = state.service.batch_create(items).await?;
    Ok(respond(StatusCode::CREATED, result))
}

async fn search_vectors(
    state: web::Data<AppState>,
    body: web::Json<SearchBody>,
) -> Result<HttpResponse, RecordStoreError> {
    let body = body.into_inner();
    let vector = parse_vector("vector", &body.vector, state.service.limits())?;
    let query = SimilarityQuery {
        vector,
        limit: body.limit,
        user_id: body.user_id,
        source_type: body.source_type,
        source_id: body.source_id,
        tags: body.tags,
        created_after: body.created_after,
        created_before: body.created_before,
    };
    let response = state.service.find_similar(query).await?;
    Ok(respond(StatusCode::OK, response))
}

async fn vector_statistics(state: web::Data<AppState>) -> Result<HttpResponse, RecordStoreError> {
    let report = state.service.statistics().await?;
    Ok(respond(StatusCode::OK, report))
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    let healthy = match state.client.health_check().await {
        Ok(healthy) => healthy,
        Err(e) => {
            log::warn!("⚠️  Health check failed: {}", e);
            false
        }
    };

    let (status, label) = if healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };
    HttpResponse::build(status).json(json!({
        "success": healthy,
        "data": {
            "status": label,
            "collection": state.service.collection_name(),
            "timestamp": Utc::now(),
        }
    }))
}

fn json_error(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    RecordStoreError::from(ValidationErrors::single("body", err.to_string())).into()
}

fn query_error(err: QueryPayloadError, _req: &HttpRequest) -> actix_web::Error {
    RecordStoreError::from(ValidationErrors::single("query", err.to_string())).into()
}

/// Registers every route and extractor config. `/vectors/stats` and `/vectors/batch` are
/// registered ahead of `/vectors/{id}`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(MAX_BODY_BYTES)
            .error_handler(json_error),
    )
    .app_data(web::QueryConfig::default().error_handler(query_error))
    .route("/health", web::get().to(health))
    .service(
        web::scope("/vectors")
            .route("", web::post().to(create_vector))
            .route("", web::get().to(list_vectors))
            .route("/batch", web::post().to(batch_create_vectors))
            .route("/search", web::post().to(search_vectors))
            .route("/stats", web::get().to(vector_statistics))
            .route("/{id}", web::get().to(get_vector))
            .route("/{id}", web::put().to(update_vector))
            .route("/{id}", web::delete().to(delete_vector)),
    );
}

/// Binds the HTTP server. The returned [`Server`] stops gracefully on SIGINT/SIGTERM.
pub fn serve(state: AppState, host: &str, port: u16) -> std::io::Result<Server> {
    let state = web::Data::new(state);
    log::info!("🌐 Binding HTTP server to {}:{}", host, port);

    let server = HttpServer::new(move || App::new().app_data(state.clone()).configure(configure))
        .bind((host, port))?
        .run();
    Ok(server)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::storage::MemoryDocumentStore;
    use actix_web::test;

    fn state() -> web::Data<AppState> {
        let config = Config::new();
        let store = Arc::new(MemoryDocumentStore::new());
        let client = Arc::new(StoreClient::with_backend(config.clone(), store.clone()));
        web::Data::new(AppState::new(
            VectorRecordService::new(store, &config),
            client,
        ))
    }

    fn payload(user: &str) -> Value {
        json!({
            "vector": vec![0.1f32; 128],
            "metadata": {
                "source_type": "journal",
                "source_id": "entry-1",
                "user_id": user,
                "tags": ["morning"],
            }
        })
    }

    #[actix_web::test]
    async fn create_then_fetch_round_trip() {
        let app = test::init_service(App::new().app_data(state()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/vectors")
            .set_json(payload("user-1"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        let id = body["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(body["data"]["metadata"]["dimensions"], 128);

        let req = test::TestRequest::get()
            .uri(&format!("/vectors/{}", id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn invalid_vector_is_bad_request_with_field_details() {
        let app = test::init_service(App::new().app_data(state()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/vectors")
            .set_json(json!({ "vector": "not-a-vector", "metadata": {} }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["details"][0]["field"], "vector");
    }

    #[actix_web::test]
    async fn unknown_id_is_not_found() {
        let app = test::init_service(App::new().app_data(state()).configure(configure)).await;
        let req = test::TestRequest::delete()
            .uri("/vectors/does-not-exist")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn list_rejects_out_of_range_limit() {
        let app = test::init_service(App::new().app_data(state()).configure(configure)).await;
        let req = test::TestRequest::get()
            .uri("/vectors?page=1&limit=1000")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn huge_page_number_is_bad_request() {
        let app = test::init_service(App::new().app_data(state()).configure(configure)).await;
        let req = test::TestRequest::get()
            .uri(&format!("/vectors?page={}&limit=10", usize::MAX))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["details"][0]["field"], "page");
    }

    #[actix_web::test]
    async fn batch_search_and_stats() {
        let app = test::init_service(App::new().app_data(state()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/vectors/batch")
            .set_json(json!({ "items": [payload("a"), payload("b")] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["inserted_count"], 2);

        let req = test::TestRequest::post()
            .uri("/vectors/search")
            .set_json(json!({ "vector": vec![0.1f32; 128], "limit": 1, "user_id": "a" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["total_results"], 1);
        assert_eq!(body["data"]["query_vector_dimensions"], 128);

        let req = test::TestRequest::get().uri("/vectors/stats").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["total_vectors"], 2);
    }

    #[actix_web::test]
    async fn health_reports_backend_state() {
        let state = state();
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let req = test::TestRequest::get().uri("/health").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        state.client.disconnect().await.unwrap();
        let req = test::TestRequest::get().uri("/health").to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
