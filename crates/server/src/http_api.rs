//! Admin HTTP surface over the discovery engine.

use crate::server_security::{AuthToken, AUTH_TOKEN_ENV};
use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use lantern_discovery::{DiscoveryError, ReconcileError, Reconciler, Supervisor};
use lantern_protocol::{
    serialize_json, BulkRequest, BulkResponse, DiscoveredAppOverride, ErrorEnvelope, SourceKind,
    SourceToggle, StatusResponse,
};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub reconciler: Reconciler,
    pub auth_token: Option<AuthToken>,
}

type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    let admin = Router::new()
        .route(
            "/api/admin/discovered-apps",
            get(list_discovered)
                .put(upsert_override)
                .delete(delete_override)
                .fallback(method_not_allowed),
        )
        .route(
            "/api/admin/discovered-apps/bulk",
            post(bulk_update).fallback(method_not_allowed),
        )
        .route(
            "/api/admin/discovery",
            get(list_sources).fallback(method_not_allowed),
        )
        .route(
            "/api/admin/discovery/:source",
            put(toggle_source).fallback(method_not_allowed),
        )
        .route(
            "/api/admin/discovery/:source/test",
            post(test_source).fallback(method_not_allowed),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        .merge(admin)
        .fallback(not_found)
        .with_state(state)
}

fn hint_for(code: &str) -> Option<String> {
    let hint = match code {
        "unauthorized" => format!(
            "The server was started with {AUTH_TOKEN_ENV}; send Authorization: Bearer <token>."
        ),
        "invalid_request" => "Check the request body and parameters.".to_string(),
        "method_not_allowed" => "See the Allow header for supported methods.".to_string(),
        "not_found" => "Valid sources: docker, nginx, traefik, npm, caddy, unraid.".to_string(),
        _ => return None,
    };
    Some(hint)
}

pub(crate) fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response {
    match serialize_json(value) {
        Ok(body) => (
            status,
            [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            Body::from(body),
        )
            .into_response(),
        Err(err) => {
            error!("failed to serialize response: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub(crate) fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    let envelope = ErrorEnvelope {
        code: code.to_string(),
        message: message.into(),
        hint: hint_for(code),
    };
    let mut response = json_response(status, &envelope);
    if status == StatusCode::UNAUTHORIZED {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    }
    response
}

fn reconcile_error_response(err: ReconcileError) -> Response {
    match err {
        ReconcileError::Validation(e) => {
            error_response(StatusCode::BAD_REQUEST, "invalid_request", e.to_string())
        }
        ReconcileError::Store(e) => {
            warn!("override store failure: {e}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_error",
                format!("Failed to save: {e}"),
            )
        }
    }
}

fn parse_source(raw: &str) -> Result<SourceKind, Response> {
    raw.parse::<SourceKind>().map_err(|_| {
        error_response(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("Unknown discovery source: {raw}"),
        )
    })
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: &Bytes) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            format!("Invalid JSON: {e}"),
        )
    })
}

async fn require_auth(
    State(state): State<SharedState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if let Some(token) = &state.auth_token {
        let authorized = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| token.matches_authorization_header(v));
        if !authorized {
            return error_response(StatusCode::UNAUTHORIZED, "unauthorized", "Unauthorized");
        }
    }
    next.run(request).await
}

async fn health() -> Response {
    json_response(StatusCode::OK, &StatusResponse::ok())
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not_found", "No such endpoint")
}

async fn method_not_allowed() -> Response {
    error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        "method_not_allowed",
        "Method not allowed",
    )
}

async fn list_discovered(State(state): State<SharedState>) -> Response {
    match state.reconciler.view().await {
        Ok(view) => json_response(StatusCode::OK, &view),
        Err(err) => reconcile_error_response(err),
    }
}

async fn upsert_override(State(state): State<SharedState>, body: Bytes) -> Response {
    let record: DiscoveredAppOverride = match parse_body(&body) {
        Ok(record) => record,
        Err(response) => return response,
    };
    match state.reconciler.upsert(record).await {
        Ok(()) => json_response(StatusCode::OK, &StatusResponse::ok()),
        Err(err) => reconcile_error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct UrlQuery {
    #[serde(default)]
    url: String,
}

async fn delete_override(
    State(state): State<SharedState>,
    Query(query): Query<UrlQuery>,
) -> Response {
    if query.url.trim().is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "URL parameter required",
        );
    }
    match state.reconciler.delete(&query.url).await {
        Ok(()) => json_response(StatusCode::OK, &StatusResponse::ok()),
        Err(err) => reconcile_error_response(err),
    }
}

async fn bulk_update(State(state): State<SharedState>, body: Bytes) -> Response {
    let request: BulkRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    match state.reconciler.bulk(request).await {
        Ok(updated) => json_response(
            StatusCode::OK,
            &BulkResponse {
                status: "ok".to_string(),
                updated,
            },
        ),
        Err(err) => reconcile_error_response(err),
    }
}

async fn list_sources(State(state): State<SharedState>) -> Response {
    json_response(StatusCode::OK, &state.supervisor.statuses())
}

async fn toggle_source(
    State(state): State<SharedState>,
    Path(source): Path<String>,
    body: Bytes,
) -> Response {
    let kind = match parse_source(&source) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    let toggle: SourceToggle = match parse_body(&body) {
        Ok(toggle) => toggle,
        Err(response) => return response,
    };
    match state.supervisor.set_enabled(kind, toggle.enabled).await {
        Ok(status) => json_response(StatusCode::OK, &status),
        Err(DiscoveryError::Config(message)) => {
            error_response(StatusCode::BAD_REQUEST, "invalid_request", message)
        }
        Err(err) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            err.to_string(),
        ),
    }
}

async fn test_source(State(state): State<SharedState>, Path(source): Path<String>) -> Response {
    let kind = match parse_source(&source) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    match state.supervisor.test_connection(kind).await {
        Ok(result) => json_response(StatusCode::OK, &result),
        Err(err) => error_response(StatusCode::NOT_FOUND, "not_found", err.to_string()),
    }
}
