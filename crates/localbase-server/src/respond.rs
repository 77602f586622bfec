//! Error and response conversion at the HTTP rim.
//!
//! Every failure becomes the canonical `{ code, message, details?, hint? }`
//! body with its mapped status; internal detail is logged, not surfaced.

use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use localbase_auth::AuthError;
use localbase_core::{ApiError, ErrorKind, Role, SessionContext};
use localbase_engine::{EngineError, RegistryError};
use localbase_rest::{format_error, FormattedResponse, RestError};

/// Handler-level error wrapper so `?` works on the crate error types.
pub struct AppError(pub ApiError);

impl AppError {
    pub fn from_engine(e: EngineError, ctx: &SessionContext) -> Self {
        AppError(e.into_api(ctx.role == Role::Authenticated))
    }
}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        AppError(e)
    }
}

impl From<RestError> for AppError {
    fn from(e: RestError) -> Self {
        AppError(e.into_api())
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        AppError(e.into_api())
    }
}

impl From<RegistryError> for AppError {
    fn from(e: RegistryError) -> Self {
        let api = match e {
            RegistryError::UnknownProject(name) => {
                ApiError::not_found(format!("Unknown project: {name}"))
            }
            RegistryError::NoActiveProject => ApiError::not_found("No active project"),
            RegistryError::NameTaken(name) => {
                ApiError::conflict("project_exists", format!("Project name already in use: {name}"))
            }
            RegistryError::Engine(engine) => engine.into_api(false),
            other => ApiError::internal(other.to_string()),
        };
        AppError(api)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.0.kind == ErrorKind::Internal {
            tracing::error!(code = %self.0.code, message = %self.0.message, "internal error");
        }
        formatted(format_error(&self.0))
    }
}

/// Convert the formatter's transport-agnostic response into axum's.
pub fn formatted(f: FormattedResponse) -> Response {
    let status = StatusCode::from_u16(f.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = match f.body {
        Some(body) => (status, body).into_response(),
        None => status.into_response(),
    };
    if let Some(content_type) = &f.content_type {
        if let Ok(value) = HeaderValue::from_str(content_type) {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
    }
    for (name, value) in &f.headers {
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(value),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatted_sets_status_and_headers() {
        let response = formatted(FormattedResponse {
            status: 206,
            content_type: Some("application/json".into()),
            headers: vec![("Content-Range".into(), "0-1/2".into())],
            body: Some("[]".into()),
        });
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(
            response.headers().get("Content-Range").unwrap(),
            "0-1/2"
        );
    }

    #[test]
    fn registry_unknown_project_is_404() {
        let err: AppError = RegistryError::UnknownProject("nope".into()).into();
        assert_eq!(err.0.status, 404);
    }
}
