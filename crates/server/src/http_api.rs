use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use semindex_indexer::{IndexOrchestrator, IndexerError};
use semindex_protocol::{codes, serialize_json, DocumentStatus, ErrorEnvelope};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

type AppState = Arc<IndexOrchestrator>;

pub fn router(orchestrator: AppState) -> Router {
    Router::new()
        .route("/index", post(index_document))
        .route("/index/status/:document_id", get(document_status))
        .route("/index/:document_id", delete(delete_document))
        .route("/search", post(search))
        .route("/stats", get(stats))
        .route("/health", get(health))
        .route("/admin/rebuild", post(rebuild))
        .with_state(orchestrator)
}

async fn index_document(State(orchestrator): State<AppState>, body: Bytes) -> Response {
    let request = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match orchestrator.index_document(request).await {
        Ok(response) => build_response(StatusCode::OK, &response),
        Err(err) => error_response(&err),
    }
}

async fn search(State(orchestrator): State<AppState>, body: Bytes) -> Response {
    let request = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match orchestrator.search(request).await {
        Ok(response) => build_response(StatusCode::OK, &response),
        Err(err) => error_response(&err),
    }
}

async fn document_status(
    State(orchestrator): State<AppState>,
    Path(document_id): Path<String>,
) -> Response {
    let status = orchestrator.get_status(&document_id);
    let code = if status.status == DocumentStatus::NotFound {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::OK
    };
    build_response(code, &status)
}

async fn delete_document(
    State(orchestrator): State<AppState>,
    Path(document_id): Path<String>,
) -> Response {
    match orchestrator.delete_document(&document_id).await {
        Ok(response) => build_response(StatusCode::OK, &response),
        Err(err) => error_response(&err),
    }
}

async fn stats(State(orchestrator): State<AppState>) -> Response {
    build_response(StatusCode::OK, &orchestrator.get_stats().await)
}

async fn health(State(orchestrator): State<AppState>) -> Response {
    let report = orchestrator.health();
    let code = if report.index_available {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    build_response(code, &report)
}

async fn rebuild(State(orchestrator): State<AppState>) -> Response {
    match orchestrator.rebuild_index().await {
        Ok(response) => build_response(StatusCode::OK, &response),
        Err(err) => error_response(&err),
    }
}

fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|err| {
        let envelope = ErrorEnvelope::new(codes::VALIDATION, format!("Invalid JSON request: {err}"))
            .with_hint(hint_for(codes::VALIDATION));
        build_response(StatusCode::BAD_REQUEST, &envelope)
    })
}

pub(crate) fn status_for_code(code: &str) -> StatusCode {
    match code {
        codes::VALIDATION | codes::INVALID_QUERY => StatusCode::BAD_REQUEST,
        codes::NOT_FOUND => StatusCode::NOT_FOUND,
        codes::CAPACITY => StatusCode::INSUFFICIENT_STORAGE,
        codes::INDEX_CORRUPTION => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn hint_for(code: &str) -> &'static str {
    match code {
        codes::VALIDATION => "Check the request body against the API schema.",
        codes::INVALID_QUERY => {
            "Use a non-empty query, a limit within the configured maximum, a threshold in [0, 1] and YYYY-MM-DD dates."
        }
        codes::NOT_FOUND => "The document is not indexed; check the document_id.",
        codes::CAPACITY => "Delete documents or raise store.max_vectors.",
        codes::INDEX_CORRUPTION => "Run POST /admin/rebuild to regenerate the index from the chunk corpus.",
        codes::EMBEDDING => "The embedding backend rejected the input; check the query text and model files.",
        _ => "See the server log for details.",
    }
}

fn error_response(err: &IndexerError) -> Response {
    let code = err.code();
    let status = status_for_code(code);
    if status.is_server_error() {
        log::warn!("Request failed ({code}): {err}");
    } else {
        log::debug!("Request rejected ({code}): {err}");
    }
    let envelope = ErrorEnvelope::new(code, err.to_string()).with_hint(hint_for(code));
    build_response(status, &envelope)
}

fn build_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serialize_json(body) {
        Ok(json) => (status, [(CONTENT_TYPE, "application/json")], json).into_response(),
        Err(err) => {
            log::error!("Failed to serialize response: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
