//! `POST /debug/sql`: raw SQL under the service role.
//!
//! Used by test harnesses and seed scripts. Not subject to the
//! translator's identifier restrictions; the schema snapshot is
//! invalidated afterwards since the statement may have been DDL.

use crate::respond::AppError;
use crate::state::ProjectContext;
use axum::extract::Extension;
use axum::Json;
use localbase_core::{ApiError, Role, SessionContext};
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;

#[derive(Debug, Deserialize)]
pub struct DebugSqlRequest {
    pub sql: String,
}

pub async fn run_sql(
    Extension(project): Extension<ProjectContext>,
    Extension(session_ctx): Extension<SessionContext>,
    Json(req): Json<DebugSqlRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !session_ctx.is_service_role() {
        let status = if session_ctx.role == Role::Anon { 401 } else { 403 };
        return Err(ApiError::auth(status, "forbidden", "debug SQL requires the service role").into());
    }
    if req.sql.trim().is_empty() {
        return Err(ApiError::validation("empty_sql", "sql must not be empty").into());
    }

    let service_ctx = SessionContext::service_role();
    let started = Instant::now();
    let mut session = project
        .engine
        .session(&service_ctx)
        .await
        .map_err(|e| AppError::from_engine(e, &session_ctx))?;
    let result = session.raw(&req.sql).await;
    session.close().await;

    // The statement may have changed the schema.
    project.engine.invalidate_catalog().await;

    let output = result.map_err(|e| AppError::from_engine(e, &session_ctx))?;
    Ok(Json(json!({
        "rows": output.rows,
        "columns": output.columns,
        "row_count": output.rows.len(),
        "rows_affected": output.rows_affected,
        "duration_ms": started.elapsed().as_millis() as u64,
    })))
}
