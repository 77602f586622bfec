//! Response shaping.
//!
//! Applies the preference headers and the endpoint family's status
//! conventions to a query result: JSON array by default, a bare object
//! under the singular accept header, CSV preserving select order,
//! `Content-Range` for counts, and 201/204 for writes.

use crate::error::RestError;
use crate::prefer::{Preferences, ResponseFormat};
use localbase_core::ApiError;
use serde_json::Value;

/// Transport-agnostic response: the kernel converts this into the
/// outbound HTTP shape.
#[derive(Debug, Clone)]
pub struct FormattedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// Everything the formatter needs to know about one executed request.
#[derive(Debug)]
pub struct ResponseInputs {
    pub method: String,
    pub head: bool,
    pub format: ResponseFormat,
    pub prefs: Preferences,
    /// Returned rows; empty for minimal writes.
    pub rows: Vec<Value>,
    /// Result column order, for CSV output.
    pub columns: Vec<String>,
    pub rows_affected: u64,
    pub offset: u64,
    /// Exact total from the count query, when requested.
    pub total: Option<u64>,
}

pub fn format_response(inputs: ResponseInputs) -> Result<FormattedResponse, RestError> {
    let is_write = matches!(inputs.method.as_str(), "POST" | "PATCH" | "DELETE" | "PUT");
    let representation = !is_write || inputs.prefs.wants_representation();
    let n = inputs.rows.len();

    let mut headers = Vec::new();
    if !is_write || inputs.total.is_some() {
        headers.push(("Content-Range".to_string(), content_range(&inputs)));
    }

    // Writes without a representation body.
    if is_write && !representation && inputs.format != ResponseFormat::SingleJson {
        let status = if inputs.method == "POST" { 201 } else { 204 };
        return Ok(FormattedResponse {
            status,
            content_type: None,
            headers,
            body: None,
        });
    }

    let status = match inputs.method.as_str() {
        "POST" => 201,
        _ => 200,
    };

    if inputs.head {
        return Ok(FormattedResponse {
            status,
            content_type: Some(content_type_for(inputs.format).to_string()),
            headers,
            body: None,
        });
    }

    let (content_type, body) = match inputs.format {
        ResponseFormat::SingleJson => {
            if n != 1 {
                return Err(RestError::SingularityViolation { count: n });
            }
            (
                "application/vnd.pgrst.object+json",
                inputs.rows[0].to_string(),
            )
        }
        ResponseFormat::Csv => ("text/csv", to_csv(&inputs.columns, &inputs.rows)),
        ResponseFormat::Json => (
            "application/json",
            serde_json::to_string(&inputs.rows)
                .map_err(|e| RestError::Parse(e.to_string()))?,
        ),
    };

    Ok(FormattedResponse {
        status,
        content_type: Some(content_type.to_string()),
        headers,
        body: Some(body),
    })
}

/// Shape an [`ApiError`] into the canonical error response.
pub fn format_error(err: &ApiError) -> FormattedResponse {
    let body = serde_json::to_string(&err.body())
        .unwrap_or_else(|_| r#"{"code":"internal_error","message":"error"}"#.to_string());
    FormattedResponse {
        status: err.status,
        content_type: Some("application/json".to_string()),
        headers: Vec::new(),
        body: Some(body),
    }
}

fn content_type_for(format: ResponseFormat) -> &'static str {
    match format {
        ResponseFormat::Json => "application/json",
        ResponseFormat::SingleJson => "application/vnd.pgrst.object+json",
        ResponseFormat::Csv => "text/csv",
    }
}

fn content_range(inputs: &ResponseInputs) -> String {
    let n = inputs.rows.len() as u64;
    let total = inputs
        .total
        .map(|t| t.to_string())
        .unwrap_or_else(|| "*".to_string());
    if n == 0 {
        format!("*/{total}")
    } else {
        let from = inputs.offset;
        let to = inputs.offset + n - 1;
        format!("{from}-{to}/{total}")
    }
}

fn to_csv(columns: &[String], rows: &[Value]) -> String {
    let mut out = String::new();
    out.push_str(&columns.join(","));
    out.push('\n');
    for row in rows {
        let fields: Vec<String> = columns
            .iter()
            .map(|column| csv_field(row.get(column).unwrap_or(&Value::Null)))
            .collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

fn csv_field(value: &Value) -> String {
    let raw = match value {
        Value::Null => return String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefer::{CountMode, ReturnMode};
    use serde_json::json;

    fn read_inputs(rows: Vec<Value>) -> ResponseInputs {
        ResponseInputs {
            method: "GET".into(),
            head: false,
            format: ResponseFormat::Json,
            prefs: Preferences::default(),
            columns: vec!["id".into(), "name".into()],
            rows,
            rows_affected: 0,
            offset: 0,
            total: None,
        }
    }

    #[test]
    fn read_returns_json_array() {
        let out = format_response(read_inputs(vec![json!({"id": 1, "name": "a"})])).unwrap();
        assert_eq!(out.status, 200);
        assert_eq!(out.body.as_deref(), Some(r#"[{"id":1,"name":"a"}]"#));
        assert_eq!(out.content_type.as_deref(), Some("application/json"));
    }

    #[test]
    fn empty_read_is_empty_array_not_null() {
        let out = format_response(read_inputs(vec![])).unwrap();
        assert_eq!(out.body.as_deref(), Some("[]"));
        let range = out
            .headers
            .iter()
            .find(|(k, _)| k == "Content-Range")
            .map(|(_, v)| v.as_str());
        assert_eq!(range, Some("*/*"));
    }

    #[test]
    fn single_object_requires_exactly_one_row() {
        let mut inputs = read_inputs(vec![]);
        inputs.format = ResponseFormat::SingleJson;
        assert!(matches!(
            format_response(inputs),
            Err(RestError::SingularityViolation { count: 0 })
        ));

        let mut inputs = read_inputs(vec![json!({"id": 1, "name": "a"})]);
        inputs.format = ResponseFormat::SingleJson;
        let out = format_response(inputs).unwrap();
        assert_eq!(out.body.as_deref(), Some(r#"{"id":1,"name":"a"}"#));
        assert_eq!(
            out.content_type.as_deref(),
            Some("application/vnd.pgrst.object+json")
        );
    }

    #[test]
    fn csv_preserves_select_column_order() {
        let mut inputs = read_inputs(vec![
            json!({"id": 1, "name": "plain"}),
            json!({"id": 2, "name": "has,comma"}),
            json!({"id": 3, "name": null}),
        ]);
        inputs.format = ResponseFormat::Csv;
        let out = format_response(inputs).unwrap();
        assert_eq!(
            out.body.as_deref(),
            Some("id,name\n1,plain\n2,\"has,comma\"\n3,\n")
        );
    }

    #[test]
    fn minimal_post_is_201_without_body() {
        let inputs = ResponseInputs {
            method: "POST".into(),
            head: false,
            format: ResponseFormat::Json,
            prefs: Preferences {
                return_mode: Some(ReturnMode::Minimal),
                ..Default::default()
            },
            rows: vec![],
            columns: vec![],
            rows_affected: 1,
            offset: 0,
            total: None,
        };
        let out = format_response(inputs).unwrap();
        assert_eq!(out.status, 201);
        assert!(out.body.is_none());
    }

    #[test]
    fn minimal_patch_is_204() {
        let inputs = ResponseInputs {
            method: "PATCH".into(),
            head: false,
            format: ResponseFormat::Json,
            prefs: Preferences::default(),
            rows: vec![],
            columns: vec![],
            rows_affected: 2,
            offset: 0,
            total: None,
        };
        let out = format_response(inputs).unwrap();
        assert_eq!(out.status, 204);
        assert!(out.body.is_none());
    }

    #[test]
    fn count_fills_content_range_total() {
        let mut inputs = read_inputs(vec![json!({"id": 1, "name": "a"}), json!({"id": 2, "name": "b"})]);
        inputs.prefs.count = Some(CountMode::Exact);
        inputs.offset = 10;
        inputs.total = Some(100);
        let out = format_response(inputs).unwrap();
        let range = out
            .headers
            .iter()
            .find(|(k, _)| k == "Content-Range")
            .map(|(_, v)| v.as_str());
        assert_eq!(range, Some("10-11/100"));
    }

    #[test]
    fn head_request_keeps_headers_drops_body() {
        let mut inputs = read_inputs(vec![json!({"id": 1, "name": "a"})]);
        inputs.head = true;
        inputs.total = Some(1);
        let out = format_response(inputs).unwrap();
        assert!(out.body.is_none());
        assert!(out.headers.iter().any(|(k, _)| k == "Content-Range"));
    }

    #[test]
    fn error_body_shape() {
        let err = ApiError::validation("PGRST100", "bad query").with_hint("fix it");
        let out = format_error(&err);
        assert_eq!(out.status, 400);
        let body: Value = serde_json::from_str(out.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["code"], "PGRST100");
        assert_eq!(body["hint"], "fix it");
        assert!(body.get("details").is_none());
    }
}
