//! The data-API translator: PostgREST-style query grammar in,
//! parameterised SQL out, plus the response formatter.
//!
//! Translation is two phases. [`parse`] turns the URL, headers, and body
//! into a [`ast::ParsedQuery`] without touching the database. [`render`]
//! turns that query into SQL against a schema snapshot, with every
//! literal as a positional parameter and every identifier validated.

pub mod ast;
pub mod error;
pub mod format;
pub mod parse;
pub mod prefer;
pub mod render;

pub use ast::ParsedQuery;
pub use error::RestError;
pub use format::{format_error, format_response, FormattedResponse, ResponseInputs};
pub use parse::{parse_request, RequestParts, TranslatedRequest};
pub use prefer::{CountMode, Preferences, Resolution, ResponseFormat, ReturnMode};
pub use render::{RenderedSql, Renderer};

use regex::Regex;
use std::sync::LazyLock;

static IDENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Reject anything that is not a plain SQL identifier. Identifiers are
/// never parameterised, so nothing else may pass.
pub(crate) fn validate_identifier(ident: &str) -> Result<(), RestError> {
    if IDENT_RE.is_match(ident) {
        Ok(())
    } else {
        Err(RestError::InvalidIdentifier(ident.to_string()))
    }
}

/// Double-quote a previously validated identifier.
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{ident}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_validation() {
        assert!(validate_identifier("products").is_ok());
        assert!(validate_identifier("_private2").is_ok());
        assert!(validate_identifier("1abc").is_err());
        assert!(validate_identifier("drop table x").is_err());
        assert!(validate_identifier("a;b").is_err());
        assert!(validate_identifier("").is_err());
    }
}
