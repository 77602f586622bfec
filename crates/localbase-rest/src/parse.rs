//! Request parsing: URL query grammar, headers, and body into a
//! [`ParsedQuery`].
//!
//! Reserved query parameters are `select`, `order`, `limit`, `offset`,
//! `on_conflict`, `columns`, and the boolean groups `or`/`and`. Every
//! other parameter is a filter `col=op.value`; dotted keys address
//! embedded resources.

use crate::ast::{
    DeleteQuery, Embed, Filter, FilterNode, FilterOp, FilterValue, InsertQuery, OrderTerm,
    ParsedQuery, RpcCall, SelectItem, SelectQuery, UpdateQuery, UpsertQuery,
};
use crate::error::RestError;
use crate::prefer::{self, Preferences, Resolution, ResponseFormat};
use crate::validate_identifier;
use serde_json::Value;

/// The pieces of an HTTP request the translator consumes.
#[derive(Debug, Clone, Copy)]
pub struct RequestParts<'a> {
    pub method: &'a str,
    /// Table name, or function name for RPC.
    pub target: &'a str,
    pub is_rpc: bool,
    pub query_string: &'a str,
    pub prefer: Option<&'a str>,
    pub accept: Option<&'a str>,
    pub range: Option<&'a str>,
    pub range_unit: Option<&'a str>,
    pub body: Option<&'a Value>,
}

/// Parser output: the query plus the response-shaping decisions.
#[derive(Debug, Clone)]
pub struct TranslatedRequest {
    pub query: ParsedQuery,
    pub prefs: Preferences,
    pub format: ResponseFormat,
    pub head: bool,
}

pub fn parse_request(parts: &RequestParts<'_>) -> Result<TranslatedRequest, RestError> {
    let prefs = prefer::parse_prefer(parts.prefer)?;
    let format = prefer::parse_accept(parts.accept);
    let method = parts.method.to_ascii_uppercase();
    let head = method == "HEAD";

    validate_identifier(parts.target)?;
    let reads_args_from_query = parts.is_rpc && (method == "GET" || method == "HEAD");
    let mut clauses = QueryClauses::parse(parts.target, parts.query_string, reads_args_from_query)?;

    if let Some((offset, limit)) = prefer::parse_range(parts.range, parts.range_unit)? {
        let root = &mut clauses.root;
        if root.offset.is_none() {
            root.offset = Some(offset);
        }
        if root.limit.is_none() {
            root.limit = limit;
        }
    }

    let query = match (method.as_str(), parts.is_rpc) {
        ("GET" | "HEAD", false) => ParsedQuery::Select(clauses.root),
        ("GET" | "HEAD", true) => ParsedQuery::Rpc(RpcCall {
            function: parts.target.to_string(),
            args: clauses.rpc_args,
            query: clauses.root,
        }),
        ("POST", true) => {
            let args = match parts.body {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Object(map)) => {
                    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
                }
                Some(_) => {
                    return Err(RestError::InvalidBody(
                        "function arguments must be a JSON object".into(),
                    ));
                }
            };
            ParsedQuery::Rpc(RpcCall {
                function: parts.target.to_string(),
                args,
                query: clauses.root,
            })
        }
        ("POST", false) => {
            let body = parts
                .body
                .ok_or_else(|| RestError::InvalidBody("missing request body".into()))?;
            let (columns, rows) = insert_rows(body, clauses.columns.take())?;
            let insert = InsertQuery {
                table: parts.target.to_string(),
                columns,
                rows,
                select: clauses.root.select,
            };
            match prefs.resolution {
                Some(resolution) => ParsedQuery::Upsert(UpsertQuery {
                    insert,
                    on_conflict: clauses.on_conflict,
                    ignore_duplicates: resolution == Resolution::IgnoreDuplicates,
                }),
                None => ParsedQuery::Insert(insert),
            }
        }
        ("PATCH", false) => {
            let body = parts
                .body
                .ok_or_else(|| RestError::InvalidBody("missing request body".into()))?;
            let set = match body {
                Value::Object(map) => {
                    let mut set = Vec::with_capacity(map.len());
                    for (column, value) in map {
                        validate_identifier(column)?;
                        set.push((column.clone(), value.clone()));
                    }
                    set
                }
                _ => {
                    return Err(RestError::InvalidBody(
                        "update body must be a JSON object".into(),
                    ));
                }
            };
            ParsedQuery::Update(UpdateQuery {
                table: parts.target.to_string(),
                set,
                filters: clauses.root.filters,
                select: clauses.root.select,
            })
        }
        ("DELETE", false) => ParsedQuery::Delete(DeleteQuery {
            table: parts.target.to_string(),
            filters: clauses.root.filters,
            select: clauses.root.select,
        }),
        _ => return Err(RestError::UnsupportedMethod(method)),
    };

    Ok(TranslatedRequest {
        query,
        prefs,
        format,
        head,
    })
}

/// Clauses accumulated from the query string.
struct QueryClauses {
    root: SelectQuery,
    on_conflict: Vec<String>,
    columns: Option<Vec<String>>,
    rpc_args: Vec<(String, Value)>,
}

impl QueryClauses {
    fn parse(table: &str, query_string: &str, rpc_get: bool) -> Result<Self, RestError> {
        let pairs: Vec<(String, String)> = form_urlencoded::parse(query_string.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        let mut root = SelectQuery::new(table);
        // The select tree must exist before dotted keys can attach
        // clauses to embeds.
        for (key, value) in &pairs {
            if key == "select" {
                root.select = parse_select_list(value)?;
            }
        }

        let mut clauses = QueryClauses {
            root,
            on_conflict: Vec::new(),
            columns: None,
            rpc_args: Vec::new(),
        };

        for (key, value) in &pairs {
            match key.as_str() {
                "select" => {}
                "order" => clauses.root.order = parse_order_list(value)?,
                "limit" => clauses.root.limit = Some(parse_count("limit", value)?),
                "offset" => clauses.root.offset = Some(parse_count("offset", value)?),
                "on_conflict" => clauses.on_conflict = ident_list(value)?,
                "columns" => clauses.columns = Some(ident_list(value)?),
                "or" => clauses
                    .root
                    .filters
                    .push(parse_group(false, false, value)?),
                "and" => clauses.root.filters.push(parse_group(true, false, value)?),
                "not.or" => clauses.root.filters.push(parse_group(false, true, value)?),
                "not.and" => clauses.root.filters.push(parse_group(true, true, value)?),
                _ => apply_keyed_clause(&mut clauses, key, value, rpc_get)?,
            }
        }
        Ok(clauses)
    }
}

/// Handle a non-reserved key: a filter, an embed-scoped clause, or (for
/// GET-style RPC) a function argument.
fn apply_keyed_clause(
    clauses: &mut QueryClauses,
    key: &str,
    value: &str,
    rpc_get: bool,
) -> Result<(), RestError> {
    let segments: Vec<&str> = key.split('.').collect();
    let last = *segments.last().unwrap_or(&"");

    if segments.len() > 1 {
        match last {
            "order" => {
                let scope = scope_mut(&mut clauses.root, &segments[..segments.len() - 1])?;
                scope.order = parse_order_list(value)?;
                return Ok(());
            }
            "limit" => {
                let scope = scope_mut(&mut clauses.root, &segments[..segments.len() - 1])?;
                scope.limit = Some(parse_count("limit", value)?);
                return Ok(());
            }
            "offset" => {
                let scope = scope_mut(&mut clauses.root, &segments[..segments.len() - 1])?;
                scope.offset = Some(parse_count("offset", value)?);
                return Ok(());
            }
            "or" | "and" => {
                let conjunction = last == "and";
                let (negated, path_len) = if segments[segments.len() - 2] == "not" {
                    (true, segments.len() - 2)
                } else {
                    (false, segments.len() - 1)
                };
                let group = parse_group(conjunction, negated, value)?;
                let scope = scope_mut(&mut clauses.root, &segments[..path_len])?;
                scope.filters.push(group);
                return Ok(());
            }
            _ => {}
        }
    }

    // A plain key on a GET RPC that does not parse as a filter is a
    // function argument.
    if rpc_get && segments.len() == 1 && parse_filter_rhs(value).is_err() {
        clauses
            .rpc_args
            .push((key.to_string(), Value::String(value.to_string())));
        return Ok(());
    }

    let (column, path) = segments
        .split_last()
        .ok_or_else(|| RestError::Parse(format!("empty parameter key: {key}")))?;
    validate_identifier(column)?;
    let (negated, op, filter_value) = parse_filter_rhs(value)?;
    let scope = scope_mut(&mut clauses.root, path)?;
    scope.filters.push(FilterNode::Cond(Filter {
        column: column.to_string(),
        op,
        value: filter_value,
        negated,
    }));
    Ok(())
}

/// Walk the select tree to the embed addressed by `path`.
fn scope_mut<'a>(
    root: &'a mut SelectQuery,
    path: &[&str],
) -> Result<&'a mut SelectQuery, RestError> {
    let mut current = root;
    for segment in path {
        let next = current.select.iter_mut().find_map(|item| match item {
            SelectItem::Embed(embed) if embed.output_name() == *segment => Some(&mut embed.query),
            _ => None,
        });
        current = next.ok_or_else(|| RestError::EmbedNotSelected(segment.to_string()))?;
    }
    Ok(current)
}

fn parse_count(name: &str, raw: &str) -> Result<u64, RestError> {
    raw.parse()
        .map_err(|_| RestError::Parse(format!("`{raw}` is not a valid value for {name}")))
}

fn ident_list(raw: &str) -> Result<Vec<String>, RestError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| validate_identifier(s).map(|_| s.to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// select= parsing
// ---------------------------------------------------------------------------

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Result<&'a str, RestError> {
        let rest = &self.src[self.pos..];
        let end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        let ident = &rest[..end];
        validate_identifier(ident)?;
        self.pos += end;
        Ok(ident)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }
}

pub fn parse_select_list(input: &str) -> Result<Vec<SelectItem>, RestError> {
    if input.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut cursor = Cursor::new(input.trim());
    let items = parse_select_items(&mut cursor)?;
    if !cursor.at_end() {
        return Err(RestError::Parse(format!(
            "unexpected trailing input in select: {}",
            &cursor.src[cursor.pos..]
        )));
    }
    Ok(items)
}

fn parse_select_items(cursor: &mut Cursor<'_>) -> Result<Vec<SelectItem>, RestError> {
    let mut items = vec![parse_select_item(cursor)?];
    while cursor.eat(',') {
        items.push(parse_select_item(cursor)?);
    }
    Ok(items)
}

fn parse_select_item(cursor: &mut Cursor<'_>) -> Result<SelectItem, RestError> {
    if cursor.eat('*') {
        return Ok(SelectItem::Star);
    }
    let first = cursor.ident()?;
    let (alias, name) = if cursor.eat(':') {
        (Some(first.to_string()), cursor.ident()?)
    } else {
        (None, first)
    };
    let fk_hint = if cursor.eat('!') {
        Some(cursor.ident()?.to_string())
    } else {
        None
    };

    if cursor.eat('(') {
        let select = if cursor.peek() == Some(')') {
            Vec::new()
        } else {
            parse_select_items(cursor)?
        };
        if !cursor.eat(')') {
            return Err(RestError::Parse("unterminated embed in select".into()));
        }
        let mut query = SelectQuery::new(name);
        query.select = select;
        Ok(SelectItem::Embed(Embed {
            alias,
            fk_hint,
            query,
        }))
    } else {
        if fk_hint.is_some() {
            return Err(RestError::Parse(format!(
                "foreign-key hint on plain column: {name}"
            )));
        }
        Ok(SelectItem::Column {
            name: name.to_string(),
            alias,
        })
    }
}

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Parse the right-hand side of a filter: `[not.]op[.(config)].value`.
pub fn parse_filter_rhs(raw: &str) -> Result<(bool, FilterOp, FilterValue), RestError> {
    let (negated, rest) = match raw.strip_prefix("not.") {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let op_end = rest
        .find(['.', '('])
        .ok_or_else(|| RestError::Parse(format!("missing operator value: {raw}")))?;
    let name = &rest[..op_end];

    let (config, value_part) = if rest[op_end..].starts_with('(') {
        let close = rest[op_end..]
            .find(')')
            .ok_or_else(|| RestError::Parse(format!("unterminated operator config: {raw}")))?
            + op_end;
        let config = rest[op_end + 1..close].to_string();
        validate_identifier(&config)?;
        let after = rest[close + 1..]
            .strip_prefix('.')
            .ok_or_else(|| RestError::Parse(format!("missing operator value: {raw}")))?;
        (Some(config), after)
    } else {
        (None, &rest[op_end + 1..])
    };

    let op = FilterOp::parse(name, config)
        .ok_or_else(|| RestError::Parse(format!("unknown operator: {name}")))?;

    let value = match op {
        FilterOp::In => FilterValue::List(split_list(value_part)?),
        FilterOp::Is => {
            if !matches!(value_part, "null" | "true" | "false" | "unknown") {
                return Err(RestError::Parse(format!(
                    "`is` accepts null, true, false or unknown, got: {value_part}"
                )));
            }
            FilterValue::Scalar(value_part.to_string())
        }
        _ => FilterValue::Scalar(value_part.to_string()),
    };
    Ok((negated, op, value))
}

fn split_list(raw: &str) -> Result<Vec<String>, RestError> {
    let inner = raw
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(|| RestError::Parse(format!("malformed list: {raw}")))?;
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(split_top_level(inner)
        .into_iter()
        .map(|item| unquote(item.trim()))
        .collect())
}

/// Split on commas at depth zero, honouring parentheses and double
/// quotes with backslash escapes.
fn split_top_level(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut escaped = false;

    for c in input.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                current.push(c);
                in_quotes = !in_quotes;
            }
            '(' if !in_quotes => {
                current.push(c);
                depth += 1;
            }
            ')' if !in_quotes => {
                current.push(c);
                depth = depth.saturating_sub(1);
            }
            ',' if !in_quotes && depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn unquote(raw: &str) -> String {
    let Some(inner) = raw
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
    else {
        return raw.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut escaped = false;
    for c in inner.chars() {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else {
            out.push(c);
        }
    }
    out
}

/// Parse a boolean group body: `(cond, cond, and(...), ...)`.
fn parse_group(conjunction: bool, negated: bool, raw: &str) -> Result<FilterNode, RestError> {
    let inner = raw
        .trim()
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(|| RestError::Parse(format!("boolean group must be parenthesised: {raw}")))?;

    let mut children = Vec::new();
    for element in split_top_level(inner) {
        let element = element.trim();
        if element.is_empty() {
            continue;
        }
        children.push(parse_group_element(element)?);
    }
    if children.is_empty() {
        return Err(RestError::Parse("empty boolean group".into()));
    }
    Ok(FilterNode::Group {
        conjunction,
        negated,
        children,
    })
}

fn parse_group_element(element: &str) -> Result<FilterNode, RestError> {
    for (prefix, conjunction, negated) in [
        ("and(", true, false),
        ("or(", false, false),
        ("not.and(", true, true),
        ("not.or(", false, true),
    ] {
        if let Some(rest) = element.strip_prefix(prefix) {
            // Re-attach the opening parenthesis the prefix consumed.
            return parse_group(conjunction, negated, &format!("({rest}"));
        }
    }
    let (column, rhs) = element
        .split_once('.')
        .ok_or_else(|| RestError::Parse(format!("malformed condition: {element}")))?;
    validate_identifier(column)?;
    let (negated, op, value) = parse_filter_rhs(rhs)?;
    Ok(FilterNode::Cond(Filter {
        column: column.to_string(),
        op,
        value,
        negated,
    }))
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

pub fn parse_order_list(raw: &str) -> Result<Vec<OrderTerm>, RestError> {
    let mut terms = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let mut pieces = part.split('.');
        let column = pieces
            .next()
            .ok_or_else(|| RestError::Parse(format!("malformed order term: {part}")))?;
        validate_identifier(column)?;
        let mut term = OrderTerm {
            column: column.to_string(),
            ascending: true,
            nulls_first: None,
        };
        for modifier in pieces {
            match modifier {
                "asc" => term.ascending = true,
                "desc" => term.ascending = false,
                "nullsfirst" => term.nulls_first = Some(true),
                "nullslast" => term.nulls_first = Some(false),
                other => {
                    return Err(RestError::Parse(format!(
                        "unknown order modifier: {other}"
                    )));
                }
            }
        }
        terms.push(term);
    }
    Ok(terms)
}

// ---------------------------------------------------------------------------
// Bodies
// ---------------------------------------------------------------------------

fn insert_rows(
    body: &Value,
    columns_param: Option<Vec<String>>,
) -> Result<(Vec<String>, Vec<Vec<Value>>), RestError> {
    let objects: Vec<&serde_json::Map<String, Value>> = match body {
        Value::Object(map) => vec![map],
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_object().ok_or_else(|| {
                    RestError::InvalidBody("insert rows must be JSON objects".into())
                })
            })
            .collect::<Result<_, _>>()?,
        _ => {
            return Err(RestError::InvalidBody(
                "insert body must be a JSON object or array of objects".into(),
            ));
        }
    };

    if objects.is_empty() {
        return Ok((columns_param.unwrap_or_default(), Vec::new()));
    }

    let columns = match columns_param {
        Some(columns) => columns,
        None => {
            let columns: Vec<String> = objects[0].keys().cloned().collect();
            for column in &columns {
                validate_identifier(column)?;
            }
            columns
        }
    };

    let mut rows = Vec::with_capacity(objects.len());
    for object in &objects {
        for key in object.keys() {
            if !columns.iter().any(|c| c == key) {
                return Err(RestError::InvalidBody(format!(
                    "all object keys must match; unexpected key: {key}"
                )));
            }
        }
        rows.push(
            columns
                .iter()
                .map(|column| object.get(column).cloned().unwrap_or(Value::Null))
                .collect(),
        );
    }
    Ok((columns, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn get(target: &str, query_string: &str) -> RequestParts<'_> {
        RequestParts {
            method: "GET",
            target,
            is_rpc: false,
            query_string,
            prefer: None,
            accept: None,
            range: None,
            range_unit: None,
            body: None,
        }
    }

    fn parse_select(target: &str, qs: &str) -> SelectQuery {
        match parse_request(&get(target, qs)).unwrap().query {
            ParsedQuery::Select(q) => q,
            other => panic!("expected select, got {other:?}"),
        }
    }

    #[test]
    fn plain_filters_and_paging() {
        let q = parse_select("products", "product_id=eq.999&limit=2&offset=4");
        assert_eq!(q.limit, Some(2));
        assert_eq!(q.offset, Some(4));
        assert_eq!(q.filters.len(), 1);
        match &q.filters[0] {
            FilterNode::Cond(f) => {
                assert_eq!(f.column, "product_id");
                assert_eq!(f.op, FilterOp::Eq);
                assert_eq!(f.value, FilterValue::Scalar("999".into()));
                assert!(!f.negated);
            }
            other => panic!("unexpected filter {other:?}"),
        }
    }

    #[test]
    fn invalid_limit_is_a_parse_error() {
        let err = parse_request(&get("products", "limit=invalid")).unwrap_err();
        assert!(matches!(err, RestError::Parse(_)));
    }

    #[test]
    fn select_with_alias_and_embed() {
        let q = parse_select(
            "instruments",
            "select=name,section:orchestral_sections!fk_section(id,name)",
        );
        assert_eq!(q.select.len(), 2);
        match &q.select[1] {
            SelectItem::Embed(embed) => {
                assert_eq!(embed.alias.as_deref(), Some("section"));
                assert_eq!(embed.fk_hint.as_deref(), Some("fk_section"));
                assert_eq!(embed.query.table, "orchestral_sections");
                assert_eq!(embed.query.select.len(), 2);
            }
            other => panic!("expected embed, got {other:?}"),
        }
    }

    #[test]
    fn dotted_filter_lands_on_embed_not_root() {
        let q = parse_select(
            "instruments",
            "select=name,orchestral_sections(*)&orchestral_sections.name=eq.percussion",
        );
        assert!(q.filters.is_empty());
        match &q.select[1] {
            SelectItem::Embed(embed) => {
                assert_eq!(embed.query.filters.len(), 1);
            }
            other => panic!("expected embed, got {other:?}"),
        }
    }

    #[test]
    fn dotted_filter_without_selected_embed_fails() {
        let err =
            parse_request(&get("instruments", "orchestral_sections.name=eq.percussion"))
                .unwrap_err();
        assert!(matches!(err, RestError::EmbedNotSelected(_)));
    }

    #[test]
    fn in_list_with_quoted_items() {
        let (negated, op, value) = parse_filter_rhs("in.(1,\"two, three\",4)").unwrap();
        assert!(!negated);
        assert_eq!(op, FilterOp::In);
        assert_eq!(
            value,
            FilterValue::List(vec!["1".into(), "two, three".into(), "4".into()])
        );
    }

    #[test]
    fn negated_and_fts_operators() {
        let (negated, op, _) = parse_filter_rhs("not.ilike.*abc*").unwrap();
        assert!(negated);
        assert_eq!(op, FilterOp::Ilike);

        let (_, op, value) = parse_filter_rhs("fts(english).fat+cat").unwrap();
        assert_eq!(
            op,
            FilterOp::Fts {
                kind: crate::ast::FtsKind::Query,
                config: Some("english".into())
            }
        );
        assert_eq!(value, FilterValue::Scalar("fat+cat".into()));
    }

    #[test]
    fn is_rejects_arbitrary_values() {
        assert!(parse_filter_rhs("is.null").is_ok());
        assert!(parse_filter_rhs("is.banana").is_err());
    }

    #[test]
    fn boolean_group_parses_recursively() {
        let q = parse_select(
            "products",
            "or=(unit_price.lt.10,and(discontinued.is.true,unit_price.gt.100))",
        );
        match &q.filters[0] {
            FilterNode::Group {
                conjunction,
                negated,
                children,
            } => {
                assert!(!conjunction);
                assert!(!negated);
                assert_eq!(children.len(), 2);
                assert!(matches!(children[1], FilterNode::Group { conjunction: true, .. }));
            }
            other => panic!("expected group, got {other:?}"),
        }
    }

    #[test]
    fn order_modifiers() {
        let terms = parse_order_list("name.desc.nullslast,price").unwrap();
        assert_eq!(terms.len(), 2);
        assert!(!terms[0].ascending);
        assert_eq!(terms[0].nulls_first, Some(false));
        assert!(terms[1].ascending);
    }

    #[test]
    fn range_header_fills_missing_paging() {
        let mut parts = get("products", "");
        parts.range = Some("0-9");
        parts.range_unit = Some("items");
        match parse_request(&parts).unwrap().query {
            ParsedQuery::Select(q) => {
                assert_eq!(q.offset, Some(0));
                assert_eq!(q.limit, Some(10));
            }
            other => panic!("expected select, got {other:?}"),
        }
    }

    #[test]
    fn post_with_merge_resolution_is_upsert() {
        let body = json!({"product_id": 1, "product_name": "Chai"});
        let parts = RequestParts {
            method: "POST",
            target: "products",
            is_rpc: false,
            query_string: "on_conflict=product_id",
            prefer: Some("resolution=merge-duplicates"),
            accept: None,
            range: None,
            range_unit: None,
            body: Some(&body),
        };
        match parse_request(&parts).unwrap().query {
            ParsedQuery::Upsert(upsert) => {
                assert_eq!(upsert.on_conflict, vec!["product_id"]);
                assert!(!upsert.ignore_duplicates);
                assert_eq!(upsert.insert.columns, vec!["product_id", "product_name"]);
            }
            other => panic!("expected upsert, got {other:?}"),
        }
    }

    #[test]
    fn insert_rows_reject_mismatched_keys() {
        let body = json!([{"a": 1}, {"a": 2, "b": 3}]);
        let err = insert_rows(&body, None).unwrap_err();
        assert!(matches!(err, RestError::InvalidBody(_)));
    }

    #[test]
    fn rpc_post_takes_args_from_body() {
        let body = json!({"lower": 10, "upper": 20});
        let parts = RequestParts {
            method: "POST",
            target: "products_in_range",
            is_rpc: true,
            query_string: "select=product_name",
            prefer: None,
            accept: None,
            range: None,
            range_unit: None,
            body: Some(&body),
        };
        match parse_request(&parts).unwrap().query {
            ParsedQuery::Rpc(rpc) => {
                assert_eq!(rpc.function, "products_in_range");
                assert_eq!(rpc.args.len(), 2);
                assert_eq!(rpc.query.select.len(), 1);
            }
            other => panic!("expected rpc, got {other:?}"),
        }
    }

    #[test]
    fn rpc_get_separates_args_from_filters() {
        let parts = RequestParts {
            method: "GET",
            target: "search_products",
            is_rpc: true,
            query_string: "term=chai&unit_price=gt.10",
            prefer: None,
            accept: None,
            range: None,
            range_unit: None,
            body: None,
        };
        match parse_request(&parts).unwrap().query {
            ParsedQuery::Rpc(rpc) => {
                assert_eq!(rpc.args, vec![("term".to_string(), json!("chai"))]);
                assert_eq!(rpc.query.filters.len(), 1);
            }
            other => panic!("expected rpc, got {other:?}"),
        }
    }

    #[test]
    fn canonical_round_trip_is_stable() {
        let q = parse_select(
            "instruments",
            "select=name,orchestral_sections(id,name)&name=like.v*\
             &orchestral_sections.name=eq.strings&order=name.asc&limit=5",
        );
        let canonical = q.canonical_query_string();
        let reparsed = parse_select("instruments", &canonical);
        assert_eq!(q, reparsed);
        assert_eq!(reparsed.canonical_query_string(), canonical);
    }

    #[test]
    fn put_is_not_supported() {
        let mut parts = get("products", "");
        parts.method = "PUT";
        let err = parse_request(&parts).unwrap_err();
        assert!(matches!(err, RestError::UnsupportedMethod(_)));
    }
}
