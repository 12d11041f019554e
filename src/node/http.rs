//! HTTP surface of a node
//!
//! Public API under `/api`, node-to-node plumbing under `/internal`.

use crate::common::{encode_name, Error};
use crate::node::Node;
use crate::rpc::http::{AddressBook, Announcement};
use crate::rpc::{Event, Request, RpcHandler};
use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub node: Arc<Node>,
    pub book: Arc<AddressBook>,
    /// Address this node advertises to peers
    pub address: String,
}

/// Error response carrying the crate error's status
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0.to_http_status(), self.0.to_string()).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct FilenameQuery {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct AnnounceQuery {
    from: Option<String>,
}

pub fn create_router(state: AppState, max_body_bytes: u64) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/hello", get(hello))
        .route("/api/node/info", get(node_info))
        .route("/api/files", get(list_files))
        .route("/api/file/upload", post(upload_file))
        .route("/api/file/:id", get(download_file))
        .route("/api/file/:id/content", get(download_content))
        .route("/api/chunk/retrieve", get(retrieve_chunk))
        .route("/api/duplicate/retrieve", get(retrieve_duplicate))
        .route("/internal/rpc", post(internal_rpc))
        .route("/internal/event", post(internal_event))
        .route("/internal/announce", get(announce))
        .route("/internal/cache/:key", get(cache_get).put(cache_put))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(
                    usize::try_from(max_body_bytes).unwrap_or(usize::MAX),
                )),
        )
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.node.snapshot();
    Json(json!({
        "status": "healthy",
        "node_id": snapshot.node_id,
        "is_coordinator": snapshot.self_coordinator_state,
        "election_state": snapshot.election_state,
        "version": crate::VERSION,
    }))
}

async fn hello(State(state): State<AppState>) -> impl IntoResponse {
    format!("Hello from node {}", state.node.node_id())
}

async fn node_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.node.info())
}

async fn list_files(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let files = state.node.replication().metadata().list_files().await?;
    Ok(Json(files))
}

async fn upload_file(
    State(state): State<AppState>,
    Query(query): Query<FilenameQuery>,
    headers: HeaderMap,
    body: Body,
) -> ApiResult<impl IntoResponse> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    let receipt = state
        .node
        .replication()
        .upload(&query.filename, &content_type, body.into_data_stream())
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let report = state.node.replication().download(&id).await?;
    Ok(Json(report))
}

async fn download_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let replication = state.node.replication();
    let report = replication.download(&id).await?;
    let data = tokio::fs::read(&report.assembled_path).await.map_err(Error::from);
    // removed even when the read failed
    if let Err(e) = replication.discard(&report).await {
        warn!("Could not remove {}: {}", report.output_dir.display(), e);
    }
    let data = data?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        encode_name(&report.file.original_name)
    );
    Ok((
        [
            (header::CONTENT_TYPE, report.file.content_type.clone()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    ))
}

async fn retrieve_chunk(
    State(state): State<AppState>,
    Query(query): Query<FilenameQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(state.node.replication().read_chunk(&query.filename).await?)
}

async fn retrieve_duplicate(
    State(state): State<AppState>,
    Query(query): Query<FilenameQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(state.node.replication().read_duplicate(&query.filename).await?)
}

async fn internal_rpc(State(state): State<AppState>, body: Bytes) -> ApiResult<impl IntoResponse> {
    let request: Request = bincode::deserialize(&body).map_err(Error::from)?;
    let reply = state.node.handle(request).await?;
    let bytes = bincode::serialize(&reply).map_err(Error::from)?;
    Ok(bytes)
}

async fn internal_event(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let event: Event = bincode::deserialize(&body).map_err(Error::from)?;
    state.node.on_event(event).await;
    Ok(StatusCode::NO_CONTENT)
}

async fn announce(
    State(state): State<AppState>,
    Query(query): Query<AnnounceQuery>,
) -> impl IntoResponse {
    if let Some(from) = query.from {
        state.book.add_address(from);
    }
    Json(Announcement {
        node_id: state.node.node_id().clone(),
        services: vec![state.node.service_name().to_string()],
        address: state.address.clone(),
    })
}

async fn cache_get(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Response> {
    use crate::cluster::DistributedCache;
    match state.node.hosted_cache().get(&key).await? {
        Some(value) => Ok(value.into_response()),
        None => Ok(StatusCode::NOT_FOUND.into_response()),
    }
}

async fn cache_put(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: String,
) -> ApiResult<impl IntoResponse> {
    use crate::cluster::DistributedCache;
    state.node.hosted_cache().set(&key, &body).await?;
    Ok(StatusCode::NO_CONTENT)
}
