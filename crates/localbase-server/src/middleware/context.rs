//! Per-request context: instrumentation, project routing, and
//! credential classification.
//!
//! Runs inside the CORS/trace/panic layers and ahead of every executor.
//! It assigns the request id, resolves the project (path prefix,
//! `x-project` header, or the active project), derives the session
//! context from the request's credentials, and emits the begin/end log
//! pair. Credentials and tokens are never logged.

use crate::respond::AppError;
use crate::state::{AppState, ProjectContext};
use axum::{
    extract::{Request, State},
    http::{HeaderValue, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Route families that are not project path prefixes.
const RESERVED_PREFIXES: &[&str] = &["", "rest", "auth", "debug", "health"];

pub async fn prepare_request(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let request_id = Uuid::new_v4();
    let start = Instant::now();
    let method = req.method().clone();
    let original_path = req.uri().path().to_string();

    // Project reference, weakest first: a host prefix
    // (`<project>.localhost`), an x-project header, or a leading path
    // segment that is not one of the API prefixes. A host-derived
    // reference that matches nothing falls back to the active project;
    // explicit references do not.
    let mut from_host = false;
    let mut project_ref = req
        .headers()
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .and_then(host_project_ref);
    if project_ref.is_some() {
        from_host = true;
    }
    if let Some(header) = req
        .headers()
        .get("x-project")
        .and_then(|v| v.to_str().ok())
    {
        project_ref = Some(header.to_string());
        from_host = false;
    }

    let trimmed = original_path.trim_start_matches('/');
    let (first, rest) = trimmed.split_once('/').unwrap_or((trimmed, ""));
    if !RESERVED_PREFIXES.contains(&first) {
        project_ref = Some(first.to_string());
        from_host = false;
        let new_path = format!("/{rest}");
        let rewritten = match req.uri().query() {
            Some(query) => format!("{new_path}?{query}"),
            None => new_path,
        };
        if let Ok(uri) = rewritten.parse::<Uri>() {
            *req.uri_mut() = uri;
        }
    }

    tracing::info!(%request_id, %method, path = %original_path, "request start");

    let path = req.uri().path();
    let needs_project =
        path.starts_with("/rest/") || path.starts_with("/auth/") || path.starts_with("/debug");
    if needs_project {
        let mut resolved = state.registry.resolve(project_ref.as_deref()).await;
        if resolved.is_err() && from_host {
            resolved = state.registry.resolve(None).await;
        }
        match resolved {
            Ok((meta, engine)) => {
                let auth = state.auth_core(&meta.id, engine.clone()).await;
                req.extensions_mut().insert(ProjectContext { meta, engine, auth });
            }
            Err(e) => {
                return finish(AppError::from(e).into_response(), request_id, start);
            }
        }
    }

    let bearer = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .map(str::to_string);
    let apikey = req
        .headers()
        .get("apikey")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let session_ctx = state.jwt.classify(bearer.as_deref(), apikey.as_deref());

    req.extensions_mut().insert(session_ctx);

    let response = next.run(req).await;
    finish(response, request_id, start)
}

/// `myproject.localhost:54321` → `myproject`. Bare hosts and IPs carry
/// no project reference.
fn host_project_ref(host: &str) -> Option<String> {
    let name = host.split(':').next().unwrap_or(host);
    let (first, rest) = name.split_once('.')?;
    if rest.is_empty() || first.is_empty() || first.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if matches!(first, "localhost" | "www" | "api") {
        return None;
    }
    Some(first.to_string())
}

fn finish(mut response: Response, request_id: Uuid, start: Instant) -> Response {
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert("x-request-id", value);
    }
    tracing::info!(
        %request_id,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "request end"
    );
    response
}
