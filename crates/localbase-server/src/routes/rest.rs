//! The data executor: `/rest/v1/<table>` and `/rest/v1/rpc/<fn>`.
//!
//! Translate, bind the session context, run, release, format. Parse
//! failures answer before any engine call is made.

use crate::respond::{self, AppError};
use crate::state::ProjectContext;
use axum::body::Bytes;
use axum::extract::{Extension, Path, RawQuery};
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use localbase_core::SessionContext;
use localbase_engine::{Engine, QueryOutput, SchemaCatalog};
use localbase_rest::{
    format_response, parse_request, ParsedQuery, Renderer, RequestParts, ResponseFormat,
    ResponseInputs, RestError,
};
use std::sync::Arc;

pub async fn table(
    Extension(project): Extension<ProjectContext>,
    Extension(session_ctx): Extension<SessionContext>,
    Path(table): Path<String>,
    method: Method,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Response, AppError> {
    execute(
        &project,
        &session_ctx,
        &table,
        false,
        &method,
        &headers,
        query.as_deref().unwrap_or(""),
        &body,
    )
    .await
}

pub async fn rpc(
    Extension(project): Extension<ProjectContext>,
    Extension(session_ctx): Extension<SessionContext>,
    Path(function): Path<String>,
    method: Method,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Response, AppError> {
    execute(
        &project,
        &session_ctx,
        &function,
        true,
        &method,
        &headers,
        query.as_deref().unwrap_or(""),
        &body,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn execute(
    project: &ProjectContext,
    session_ctx: &SessionContext,
    target: &str,
    is_rpc: bool,
    method: &Method,
    headers: &HeaderMap,
    query_string: &str,
    body: &Bytes,
) -> Result<Response, AppError> {
    let body_value: Option<serde_json::Value> = if body.is_empty() {
        None
    } else {
        Some(
            serde_json::from_slice(body)
                .map_err(|e| RestError::InvalidBody(format!("invalid JSON body: {e}")))?,
        )
    };

    let parts = RequestParts {
        method: method.as_str(),
        target,
        is_rpc,
        query_string,
        prefer: header_str(headers, "prefer"),
        accept: header_str(headers, "accept"),
        range: header_str(headers, "range"),
        range_unit: header_str(headers, "range-unit"),
        body: body_value.as_ref(),
    };
    let translated = parse_request(&parts)?;

    let catalog = catalog_for(&project.engine, target, is_rpc, session_ctx).await?;
    let renderer = Renderer::new(&catalog);

    let is_read = matches!(
        translated.query,
        ParsedQuery::Select(_) | ParsedQuery::Rpc(_)
    );
    let representation = is_read
        || translated.prefs.wants_representation()
        || translated.format == ResponseFormat::SingleJson;

    let rendered = renderer.render(&translated.query, representation)?;
    let count_sql = if translated.prefs.count.is_some() {
        renderer.render_count(&translated.query)?
    } else {
        None
    };

    let mut session = project
        .engine
        .session(session_ctx)
        .await
        .map_err(|e| AppError::from_engine(e, session_ctx))?;

    let run = async {
        let output = if rendered.returns_rows {
            session.fetch_json(&rendered.sql, &rendered.params).await?
        } else {
            let affected = session.execute(&rendered.sql, &rendered.params).await?;
            QueryOutput {
                rows_affected: affected,
                ..Default::default()
            }
        };
        let total = match &count_sql {
            Some(count) => {
                let counted = session.query(&count.sql, &count.params).await?;
                Some(
                    counted
                        .rows
                        .first()
                        .and_then(|row| row.get("count"))
                        .and_then(|v| v.as_u64())
                        .unwrap_or(0),
                )
            }
            None => None,
        };
        Ok::<_, localbase_engine::EngineError>((output, total))
    }
    .await;
    session.close().await;

    let (output, total) = run.map_err(|e| AppError::from_engine(e, session_ctx))?;

    let offset = match &translated.query {
        ParsedQuery::Select(q) => q.offset.unwrap_or(0),
        ParsedQuery::Rpc(call) => call.query.offset.unwrap_or(0),
        _ => 0,
    };

    let formatted = format_response(ResponseInputs {
        method: method.as_str().to_ascii_uppercase(),
        head: translated.head,
        format: translated.format,
        prefs: translated.prefs,
        rows: output.rows,
        columns: output.columns,
        rows_affected: output.rows_affected,
        offset,
        total,
    })?;
    Ok(respond::formatted(formatted))
}

/// Schema snapshot, refreshed once when the target is not in the cached
/// copy (it may have been created since the last introspection).
async fn catalog_for(
    engine: &Arc<Engine>,
    target: &str,
    is_rpc: bool,
    session_ctx: &SessionContext,
) -> Result<Arc<SchemaCatalog>, AppError> {
    let catalog = engine
        .catalog()
        .await
        .map_err(|e| AppError::from_engine(e, session_ctx))?;
    let known = if is_rpc {
        catalog.function(target).is_some()
    } else {
        catalog.table(target).is_some()
    };
    if known {
        return Ok(catalog);
    }
    engine.invalidate_catalog().await;
    engine
        .catalog()
        .await
        .map_err(|e| AppError::from_engine(e, session_ctx))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
