//! Error types for the query translator.

use localbase_core::{ApiError, ErrorKind};
use thiserror::Error;

/// Errors raised while parsing or rendering a data-API request.
#[derive(Debug, Error)]
pub enum RestError {
    /// Query string could not be parsed.
    #[error("failed to parse query: {0}")]
    Parse(String),

    /// An identifier failed validation.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Request body was missing or malformed.
    #[error("invalid request body: {0}")]
    InvalidBody(String),

    /// The Range header could not be interpreted.
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// HTTP verb not supported by the data API.
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    /// Singular response requested but the result was not one row.
    #[error("JSON object requested, multiple (or no) rows returned")]
    SingularityViolation { count: usize },

    /// A dotted parameter targets an embed the select list does not
    /// include.
    #[error("filter targets an embedded resource that is not selected: {0}")]
    EmbedNotSelected(String),

    /// No foreign key connects the two tables.
    #[error("could not find a relationship between {from} and {to}")]
    UnknownRelationship { from: String, to: String },

    /// More than one foreign key connects the two tables and no hint was
    /// given.
    #[error("more than one relationship between {from} and {to}")]
    AmbiguousRelationship {
        from: String,
        to: String,
        candidates: Vec<String>,
    },

    /// RPC target does not exist or its arguments do not match.
    #[error("could not find function {0}")]
    UnknownFunction(String),

    /// Preferences contradict each other.
    #[error("contradictory preferences: {0}")]
    ContradictoryPreferences(String),
}

impl RestError {
    pub fn into_api(self) -> ApiError {
        match self {
            RestError::Parse(msg) => ApiError::validation("PGRST100", msg),
            RestError::InvalidIdentifier(ident) => ApiError::validation(
                "PGRST100",
                format!("invalid identifier: {ident}"),
            ),
            RestError::InvalidBody(msg) => ApiError::validation("PGRST102", msg),
            RestError::InvalidRange(msg) => ApiError::validation("PGRST103", msg),
            RestError::UnsupportedMethod(m) => ApiError::new(
                ErrorKind::Validation,
                405,
                "PGRST117",
                format!("unsupported HTTP method: {m}"),
            ),
            RestError::SingularityViolation { count } => ApiError::new(
                ErrorKind::Validation,
                406,
                "PGRST116",
                "JSON object requested, multiple (or no) rows returned",
            )
            .with_details(format!("Results contain {count} rows")),
            RestError::EmbedNotSelected(name) => ApiError::validation(
                "PGRST108",
                format!("'{name}' is not an embedded resource in this request"),
            ),
            RestError::UnknownRelationship { from, to } => ApiError::validation(
                "PGRST200",
                format!("could not find a relationship between '{from}' and '{to}' in the schema"),
            ),
            RestError::AmbiguousRelationship { from, to, candidates } => ApiError::new(
                ErrorKind::Validation,
                300,
                "PGRST201",
                format!("more than one relationship was found for '{from}' and '{to}'"),
            )
            .with_hint(format!(
                "disambiguate with !<fk> using one of: {}",
                candidates.join(", ")
            )),
            RestError::UnknownFunction(name) => ApiError::new(
                ErrorKind::Validation,
                404,
                "PGRST202",
                format!("could not find the function public.{name} in the schema"),
            ),
            RestError::ContradictoryPreferences(msg) => ApiError::validation("PGRST100", msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singularity_violation_is_406_with_row_count() {
        let api = RestError::SingularityViolation { count: 3 }.into_api();
        assert_eq!(api.status, 406);
        assert_eq!(api.code, "PGRST116");
        assert_eq!(api.details.as_deref(), Some("Results contain 3 rows"));
    }

    #[test]
    fn parse_errors_use_the_generic_code() {
        let api = RestError::Parse("bad".into()).into_api();
        assert_eq!(api.status, 400);
        assert_eq!(api.code, "PGRST100");
    }
}
