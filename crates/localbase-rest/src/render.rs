//! SQL rendering.
//!
//! Turns a [`ParsedQuery`] into `{ sql, params }`. Every literal becomes
//! a positional text parameter with an explicit cast taken from the
//! schema snapshot; identifiers are validated and double-quoted, never
//! parameterised. Embedded resources render as `LEFT JOIN LATERAL`
//! subqueries whose JSON shape matches the upstream platform: a missing
//! to-one relation is `null`, a missing to-many relation is `[]`, and a
//! filter on an embed never filters the parent rows.

use crate::ast::{
    Filter, FilterNode, FilterOp, FilterValue, FtsKind, InsertQuery, ParsedQuery, RpcCall,
    SelectItem, SelectQuery, UpsertQuery,
};
use crate::error::RestError;
use crate::{quote_ident, validate_identifier};
use localbase_engine::{RelKind, Relationship, RelationshipLookup, SchemaCatalog};
use serde_json::Value;

/// A rendered statement and its positional parameters.
///
/// When `returns_rows` is set, the statement follows the JSON
/// convention: it yields exactly one row with one `json` column holding
/// the array of result rows, so the engine never needs per-type column
/// decoding and data-modifying statements can return their
/// representation from a top-level CTE.
#[derive(Debug, Clone)]
pub struct RenderedSql {
    pub sql: String,
    pub params: Vec<Option<String>>,
    pub returns_rows: bool,
}

/// Collects parameters as SQL text is assembled.
#[derive(Default)]
struct SqlBuilder {
    params: Vec<Option<String>>,
}

impl SqlBuilder {
    /// Register a parameter and return its placeholder, with an optional
    /// cast.
    fn param(&mut self, value: Option<String>, cast: Option<&str>) -> String {
        self.params.push(value);
        let n = self.params.len();
        match cast {
            Some(cast) => format!("${n}::{cast}"),
            None => format!("${n}"),
        }
    }
}

pub struct Renderer<'a> {
    catalog: &'a SchemaCatalog,
}

impl<'a> Renderer<'a> {
    pub fn new(catalog: &'a SchemaCatalog) -> Self {
        Self { catalog }
    }

    /// Render the main statement. `representation` selects the
    /// row-returning form for writes (`WITH ... RETURNING *` plus the
    /// `select=` projection).
    pub fn render(
        &self,
        query: &ParsedQuery,
        representation: bool,
    ) -> Result<RenderedSql, RestError> {
        let mut b = SqlBuilder::default();
        let (sql, returns_rows) = match query {
            ParsedQuery::Select(q) => {
                let mut counter = 0;
                let inner = self.build_select(q, None, None, false, &mut counter, &mut b)?;
                (json_rows(&inner), true)
            }
            ParsedQuery::Insert(q) => (
                self.build_insert(q, None, representation, &mut b)?,
                representation,
            ),
            ParsedQuery::Upsert(u) => {
                let conflict = self.conflict_clause(u)?;
                (
                    self.build_insert(&u.insert, Some(conflict), representation, &mut b)?,
                    representation,
                )
            }
            ParsedQuery::Update(q) => (
                self.build_update(q, representation, &mut b)?,
                representation,
            ),
            ParsedQuery::Delete(q) => (
                self.build_delete(q, representation, &mut b)?,
                representation,
            ),
            ParsedQuery::Rpc(call) => {
                let inner = self.build_rpc(call, &mut b)?;
                (json_rows(&inner), true)
            }
        };
        tracing::debug!(sql = %sql, params = b.params.len(), "rendered query");
        Ok(RenderedSql {
            sql,
            params: b.params,
            returns_rows,
        })
    }

    /// Render the exact-count companion query for reads. Writes report
    /// affected rows instead.
    pub fn render_count(&self, query: &ParsedQuery) -> Result<Option<RenderedSql>, RestError> {
        let mut b = SqlBuilder::default();
        let sql = match query {
            ParsedQuery::Select(q) => {
                let mut conds = Vec::new();
                for node in &q.filters {
                    conds.push(self.filter_node_sql(&q.table, "_t0", node, &mut b)?);
                }
                let mut sql = format!(
                    "SELECT count(*) AS count FROM {} AS _t0",
                    quote_ident(&q.table)
                );
                if !conds.is_empty() {
                    sql.push_str(" WHERE ");
                    sql.push_str(&conds.join(" AND "));
                }
                sql
            }
            ParsedQuery::Rpc(call) => {
                let source = self.rpc_source(call, &mut b)?;
                let mut conds = Vec::new();
                for node in &call.query.filters {
                    conds.push(self.filter_node_sql(&call.query.table, "_t0", node, &mut b)?);
                }
                let mut sql = format!("SELECT count(*) AS count FROM {source} AS _t0");
                if !conds.is_empty() {
                    sql.push_str(" WHERE ");
                    sql.push_str(&conds.join(" AND "));
                }
                sql
            }
            _ => return Ok(None),
        };
        Ok(Some(RenderedSql {
            sql,
            params: b.params,
            returns_rows: true,
        }))
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    fn build_select(
        &self,
        q: &SelectQuery,
        from_override: Option<&str>,
        correlation: Option<(&str, &Relationship)>,
        force_limit_one: bool,
        counter: &mut usize,
        b: &mut SqlBuilder,
    ) -> Result<String, RestError> {
        validate_identifier(&q.table)?;
        let alias = format!("_t{}", *counter);
        *counter += 1;

        let mut projections: Vec<String> = Vec::new();
        let mut joins: Vec<String> = Vec::new();

        if q.select.is_empty() {
            projections.push(format!("{alias}.*"));
        }
        for item in &q.select {
            match item {
                SelectItem::Star => projections.push(format!("{alias}.*")),
                SelectItem::Column { name, alias: out } => {
                    validate_identifier(name)?;
                    let mut p = format!("{alias}.{}", quote_ident(name));
                    if let Some(out) = out {
                        validate_identifier(out)?;
                        p.push_str(&format!(" AS {}", quote_ident(out)));
                    }
                    projections.push(p);
                }
                SelectItem::Embed(embed) => {
                    let rel = self.resolve_relationship(
                        &q.table,
                        &embed.query.table,
                        embed.fk_hint.as_deref(),
                    )?;
                    let embed_alias = format!("_e{}", *counter);
                    *counter += 1;
                    let inner = self.build_select(
                        &embed.query,
                        None,
                        Some((&alias, &rel)),
                        rel.kind == RelKind::ToOne,
                        counter,
                        b,
                    )?;
                    let wrapper = match rel.kind {
                        RelKind::ToMany => format!(
                            "LEFT JOIN LATERAL (SELECT COALESCE(json_agg(row_to_json({embed_alias}_r)), '[]'::json) AS data \
                             FROM ({inner}) AS {embed_alias}_r) AS {embed_alias} ON TRUE"
                        ),
                        RelKind::ToOne => format!(
                            "LEFT JOIN LATERAL (SELECT row_to_json({embed_alias}_r) AS data \
                             FROM ({inner}) AS {embed_alias}_r) AS {embed_alias} ON TRUE"
                        ),
                    };
                    joins.push(wrapper);
                    validate_identifier(embed.output_name())?;
                    projections.push(format!(
                        "{embed_alias}.data AS {}",
                        quote_ident(embed.output_name())
                    ));
                }
            }
        }

        let mut conds: Vec<String> = Vec::new();
        if let Some((outer, rel)) = correlation {
            for (local, foreign) in rel.local_columns.iter().zip(&rel.foreign_columns) {
                validate_identifier(local)?;
                validate_identifier(foreign)?;
                conds.push(format!(
                    "{alias}.{} = {outer}.{}",
                    quote_ident(foreign),
                    quote_ident(local)
                ));
            }
        }
        for node in &q.filters {
            conds.push(self.filter_node_sql(&q.table, &alias, node, b)?);
        }

        let quoted_table = quote_ident(&q.table);
        let source = from_override.unwrap_or(quoted_table.as_str());
        let mut sql = format!("SELECT {} FROM {source} AS {alias}", projections.join(", "));
        for join in &joins {
            sql.push(' ');
            sql.push_str(join);
        }
        if !conds.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conds.join(" AND "));
        }
        if !q.order.is_empty() {
            let mut terms = Vec::with_capacity(q.order.len());
            for term in &q.order {
                validate_identifier(&term.column)?;
                let mut t = format!(
                    "{alias}.{} {}",
                    quote_ident(&term.column),
                    if term.ascending { "ASC" } else { "DESC" }
                );
                match term.nulls_first {
                    Some(true) => t.push_str(" NULLS FIRST"),
                    Some(false) => t.push_str(" NULLS LAST"),
                    None => {}
                }
                terms.push(t);
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
        let limit = if force_limit_one { Some(1) } else { q.limit };
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = q.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        Ok(sql)
    }

    fn resolve_relationship(
        &self,
        from: &str,
        to: &str,
        hint: Option<&str>,
    ) -> Result<Relationship, RestError> {
        match self.catalog.relationship(from, to, hint) {
            RelationshipLookup::Found(rel) => Ok(rel),
            RelationshipLookup::NotFound => Err(RestError::UnknownRelationship {
                from: from.to_string(),
                to: to.to_string(),
            }),
            RelationshipLookup::Ambiguous(candidates) => Err(RestError::AmbiguousRelationship {
                from: from.to_string(),
                to: to.to_string(),
                candidates,
            }),
        }
    }

    // -----------------------------------------------------------------
    // Filters
    // -----------------------------------------------------------------

    fn filter_node_sql(
        &self,
        table: &str,
        alias: &str,
        node: &FilterNode,
        b: &mut SqlBuilder,
    ) -> Result<String, RestError> {
        match node {
            FilterNode::Cond(filter) => self.condition_sql(table, alias, filter, b),
            FilterNode::Group {
                conjunction,
                negated,
                children,
            } => {
                let glue = if *conjunction { " AND " } else { " OR " };
                let mut parts = Vec::with_capacity(children.len());
                for child in children {
                    parts.push(self.filter_node_sql(table, alias, child, b)?);
                }
                let joined = format!("({})", parts.join(glue));
                Ok(if *negated {
                    format!("NOT {joined}")
                } else {
                    joined
                })
            }
        }
    }

    fn condition_sql(
        &self,
        table: &str,
        alias: &str,
        filter: &Filter,
        b: &mut SqlBuilder,
    ) -> Result<String, RestError> {
        validate_identifier(&filter.column)?;
        let col = format!("{alias}.{}", quote_ident(&filter.column));
        let cast = self.catalog.cast_type(table, &filter.column);
        let cast = cast.as_deref();

        let scalar = |value: &FilterValue| -> Result<String, RestError> {
            match value {
                FilterValue::Scalar(v) => Ok(v.clone()),
                FilterValue::List(_) => Err(RestError::Parse(format!(
                    "operator {} does not take a list",
                    filter.op.name()
                ))),
            }
        };

        let expr = match &filter.op {
            FilterOp::Eq => format!("{col} = {}", b.param(Some(scalar(&filter.value)?), cast)),
            FilterOp::Neq => format!("{col} <> {}", b.param(Some(scalar(&filter.value)?), cast)),
            FilterOp::Gt => format!("{col} > {}", b.param(Some(scalar(&filter.value)?), cast)),
            FilterOp::Gte => format!("{col} >= {}", b.param(Some(scalar(&filter.value)?), cast)),
            FilterOp::Lt => format!("{col} < {}", b.param(Some(scalar(&filter.value)?), cast)),
            FilterOp::Lte => format!("{col} <= {}", b.param(Some(scalar(&filter.value)?), cast)),
            FilterOp::Like => {
                let pattern = scalar(&filter.value)?.replace('*', "%");
                format!("{col} LIKE {}", b.param(Some(pattern), None))
            }
            FilterOp::Ilike => {
                let pattern = scalar(&filter.value)?.replace('*', "%");
                format!("{col} ILIKE {}", b.param(Some(pattern), None))
            }
            FilterOp::In => match &filter.value {
                FilterValue::List(items) if items.is_empty() => "FALSE".to_string(),
                FilterValue::List(items) => {
                    let placeholders: Vec<String> = items
                        .iter()
                        .map(|item| b.param(Some(item.clone()), cast))
                        .collect();
                    format!("{col} IN ({})", placeholders.join(", "))
                }
                FilterValue::Scalar(_) => {
                    return Err(RestError::Parse("`in` requires a bracketed list".into()));
                }
            },
            FilterOp::Is => {
                let keyword = match scalar(&filter.value)?.as_str() {
                    "null" => "NULL",
                    "true" => "TRUE",
                    "false" => "FALSE",
                    _ => "UNKNOWN",
                };
                format!("{col} IS {keyword}")
            }
            FilterOp::Cs => format!("{col} @> {}", b.param(Some(scalar(&filter.value)?), cast)),
            FilterOp::Cd => format!("{col} <@ {}", b.param(Some(scalar(&filter.value)?), cast)),
            FilterOp::Ov => format!("{col} && {}", b.param(Some(scalar(&filter.value)?), cast)),
            FilterOp::Sl => format!("{col} << {}", b.param(Some(scalar(&filter.value)?), cast)),
            FilterOp::Sr => format!("{col} >> {}", b.param(Some(scalar(&filter.value)?), cast)),
            FilterOp::Nxl => format!("{col} &> {}", b.param(Some(scalar(&filter.value)?), cast)),
            FilterOp::Nxr => format!("{col} &< {}", b.param(Some(scalar(&filter.value)?), cast)),
            FilterOp::Adj => format!("{col} -|- {}", b.param(Some(scalar(&filter.value)?), cast)),
            FilterOp::Fts { kind, config } => {
                let func = match kind {
                    FtsKind::Query => "to_tsquery",
                    FtsKind::Plain => "plainto_tsquery",
                    FtsKind::Phrase => "phraseto_tsquery",
                    FtsKind::Websearch => "websearch_to_tsquery",
                };
                let value = b.param(Some(scalar(&filter.value)?), None);
                match config {
                    Some(config) => {
                        validate_identifier(config)?;
                        format!("to_tsvector('{config}', {col}) @@ {func}('{config}', {value})")
                    }
                    None => format!("to_tsvector({col}) @@ {func}({value})"),
                }
            }
        };

        Ok(if filter.negated {
            format!("NOT ({expr})")
        } else {
            expr
        })
    }

    // -----------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------

    fn conflict_clause(&self, upsert: &UpsertQuery) -> Result<String, RestError> {
        let table = &upsert.insert.table;
        let targets = if upsert.on_conflict.is_empty() {
            self.catalog
                .table(table)
                .map(|t| t.primary_key.clone())
                .unwrap_or_default()
        } else {
            upsert.on_conflict.clone()
        };
        if targets.is_empty() {
            return Err(RestError::Parse(format!(
                "no conflict target for upsert on {table}"
            )));
        }
        for target in &targets {
            validate_identifier(target)?;
        }
        let target_list = targets
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");

        if upsert.ignore_duplicates {
            return Ok(format!("ON CONFLICT ({target_list}) DO NOTHING"));
        }

        let updates: Vec<String> = upsert
            .insert
            .columns
            .iter()
            .filter(|c| !targets.contains(c))
            .map(|c| format!("{} = EXCLUDED.{}", quote_ident(c), quote_ident(c)))
            .collect();
        if updates.is_empty() {
            return Ok(format!("ON CONFLICT ({target_list}) DO NOTHING"));
        }
        Ok(format!(
            "ON CONFLICT ({target_list}) DO UPDATE SET {}",
            updates.join(", ")
        ))
    }

    fn build_insert(
        &self,
        q: &InsertQuery,
        conflict: Option<String>,
        representation: bool,
        b: &mut SqlBuilder,
    ) -> Result<String, RestError> {
        validate_identifier(&q.table)?;
        let table = quote_ident(&q.table);

        // An empty array body inserts nothing and represents nothing.
        if q.rows.is_empty() {
            let empty = format!("SELECT * FROM {table} AS _t0 WHERE FALSE");
            return Ok(if representation { json_rows(&empty) } else { empty });
        }

        for column in &q.columns {
            validate_identifier(column)?;
        }

        let core = if q.columns.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES")
        } else {
            let column_list = q
                .columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ");
            let mut tuples = Vec::with_capacity(q.rows.len());
            for row in &q.rows {
                let mut placeholders = Vec::with_capacity(row.len());
                for (column, value) in q.columns.iter().zip(row) {
                    let cast = self.catalog.cast_type(&q.table, column);
                    placeholders.push(b.param(json_param(value, cast.as_deref()), cast.as_deref()));
                }
                tuples.push(format!("({})", placeholders.join(", ")));
            }
            format!(
                "INSERT INTO {table} ({column_list}) VALUES {}",
                tuples.join(", ")
            )
        };

        let core = match conflict {
            Some(clause) => format!("{core} {clause}"),
            None => core,
        };

        if representation {
            let projection = self.representation_projection(&q.table, &q.select, b)?;
            Ok(format!(
                "WITH _mutated AS ({core} RETURNING *) {}",
                json_rows(&projection)
            ))
        } else {
            Ok(core)
        }
    }

    fn build_update(
        &self,
        q: &crate::ast::UpdateQuery,
        representation: bool,
        b: &mut SqlBuilder,
    ) -> Result<String, RestError> {
        validate_identifier(&q.table)?;
        let table = quote_ident(&q.table);
        if q.set.is_empty() {
            return Err(RestError::InvalidBody("update body must not be empty".into()));
        }

        let mut assignments = Vec::with_capacity(q.set.len());
        for (column, value) in &q.set {
            validate_identifier(column)?;
            let cast = self.catalog.cast_type(&q.table, column);
            assignments.push(format!(
                "{} = {}",
                quote_ident(column),
                b.param(json_param(value, cast.as_deref()), cast.as_deref())
            ));
        }

        let mut conds = Vec::new();
        for node in &q.filters {
            conds.push(self.filter_node_sql(&q.table, "_t0", node, b)?);
        }

        let mut core = format!("UPDATE {table} AS _t0 SET {}", assignments.join(", "));
        if !conds.is_empty() {
            core.push_str(" WHERE ");
            core.push_str(&conds.join(" AND "));
        }

        if representation {
            let projection = self.representation_projection(&q.table, &q.select, b)?;
            Ok(format!(
                "WITH _mutated AS ({core} RETURNING _t0.*) {}",
                json_rows(&projection)
            ))
        } else {
            Ok(core)
        }
    }

    fn build_delete(
        &self,
        q: &crate::ast::DeleteQuery,
        representation: bool,
        b: &mut SqlBuilder,
    ) -> Result<String, RestError> {
        validate_identifier(&q.table)?;
        let table = quote_ident(&q.table);

        let mut conds = Vec::new();
        for node in &q.filters {
            conds.push(self.filter_node_sql(&q.table, "_t0", node, b)?);
        }

        let mut core = format!("DELETE FROM {table} AS _t0");
        if !conds.is_empty() {
            core.push_str(" WHERE ");
            core.push_str(&conds.join(" AND "));
        }

        if representation {
            let projection = self.representation_projection(&q.table, &q.select, b)?;
            Ok(format!(
                "WITH _mutated AS ({core} RETURNING _t0.*) {}",
                json_rows(&projection)
            ))
        } else {
            Ok(core)
        }
    }

    /// Project the rows a write returned, applying the `select=` list.
    fn representation_projection(
        &self,
        table: &str,
        select: &[SelectItem],
        b: &mut SqlBuilder,
    ) -> Result<String, RestError> {
        let mut query = SelectQuery::new(table);
        query.select = select.to_vec();
        let mut counter = 0;
        self.build_select(&query, Some("_mutated"), None, false, &mut counter, b)
    }

    // -----------------------------------------------------------------
    // RPC
    // -----------------------------------------------------------------

    fn rpc_source(&self, call: &RpcCall, b: &mut SqlBuilder) -> Result<String, RestError> {
        validate_identifier(&call.function)?;
        let info = self
            .catalog
            .function(&call.function)
            .ok_or_else(|| RestError::UnknownFunction(call.function.clone()))?;

        let mut rendered_args = Vec::with_capacity(call.args.len());
        for (name, value) in &call.args {
            validate_identifier(name)?;
            let arg_type = info
                .args
                .iter()
                .find(|(arg_name, _)| arg_name == name)
                .map(|(_, ty)| ty.clone())
                .ok_or_else(|| RestError::UnknownFunction(call.function.clone()))?;
            rendered_args.push(format!(
                "{} := {}",
                quote_ident(name),
                b.param(json_param(value, Some(&arg_type)), Some(&arg_type))
            ));
        }
        Ok(format!(
            "{}({})",
            quote_ident(&call.function),
            rendered_args.join(", ")
        ))
    }

    fn build_rpc(&self, call: &RpcCall, b: &mut SqlBuilder) -> Result<String, RestError> {
        let source = self.rpc_source(call, b)?;
        let mut counter = 0;
        self.build_select(&call.query, Some(source.as_str()), None, false, &mut counter, b)
    }
}

/// Wrap a row-returning statement into the one-row/one-column JSON
/// convention the engine decodes.
fn json_rows(inner: &str) -> String {
    format!(
        "SELECT COALESCE(json_agg(row_to_json(_sub)), '[]'::json) AS _rows FROM ({inner}) AS _sub"
    )
}

/// Convert a JSON value into a text parameter. Arrays headed for array
/// columns use the Postgres array literal form; everything else composite
/// stays JSON text.
fn json_param(value: &Value, cast: Option<&str>) -> Option<String> {
    match value {
        Value::Null => None,
        // json/jsonb columns take the value's JSON text verbatim, string
        // values included.
        _ if cast.is_some_and(|c| c == "json" || c == "jsonb") => Some(value.to_string()),
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(v) => Some(v.to_string()),
        Value::Array(_) if cast.is_some_and(|c| c.ends_with("[]")) => {
            Some(pg_array_literal(value))
        }
        other => Some(other.to_string()),
    }
}

fn pg_array_literal(value: &Value) -> String {
    match value {
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(pg_array_element).collect();
            format!("{{{}}}", parts.join(","))
        }
        other => pg_array_element(other),
    }
}

fn pg_array_element(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => {
            let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{escaped}\"")
        }
        Value::Array(_) => pg_array_literal(value),
        Value::Object(_) => {
            let json = value.to_string();
            let escaped = json.replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{escaped}\"")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{parse_request, RequestParts};
    use localbase_engine::catalog::{ColumnInfo, ForeignKey, FunctionInfo, TableInfo};
    use serde_json::json;
    use std::collections::HashMap;

    fn catalog() -> SchemaCatalog {
        let mut tables = HashMap::new();
        tables.insert(
            "products".to_string(),
            TableInfo {
                name: "products".into(),
                columns: vec![
                    ColumnInfo {
                        name: "product_id".into(),
                        udt_name: "int4".into(),
                    },
                    ColumnInfo {
                        name: "product_name".into(),
                        udt_name: "text".into(),
                    },
                    ColumnInfo {
                        name: "unit_price".into(),
                        udt_name: "numeric".into(),
                    },
                    ColumnInfo {
                        name: "category_id".into(),
                        udt_name: "int4".into(),
                    },
                ],
                primary_key: vec!["product_id".into()],
                foreign_keys: vec![ForeignKey {
                    name: "products_category_id_fkey".into(),
                    columns: vec!["category_id".into()],
                    referenced_table: "categories".into(),
                    referenced_columns: vec!["category_id".into()],
                }],
            },
        );
        tables.insert(
            "categories".to_string(),
            TableInfo {
                name: "categories".into(),
                columns: vec![
                    ColumnInfo {
                        name: "category_id".into(),
                        udt_name: "int4".into(),
                    },
                    ColumnInfo {
                        name: "category_name".into(),
                        udt_name: "text".into(),
                    },
                ],
                primary_key: vec!["category_id".into()],
                foreign_keys: vec![],
            },
        );
        let mut functions = HashMap::new();
        functions.insert(
            "products_in_range".to_string(),
            FunctionInfo {
                name: "products_in_range".into(),
                returns_set: true,
                args: vec![
                    ("lower".into(), "numeric".into()),
                    ("upper".into(), "numeric".into()),
                ],
            },
        );
        SchemaCatalog::from_parts(tables, functions)
    }

    fn translate(method: &str, target: &str, qs: &str, body: Option<&Value>) -> ParsedQuery {
        let parts = RequestParts {
            method,
            target,
            is_rpc: false,
            query_string: qs,
            prefer: None,
            accept: None,
            range: None,
            range_unit: None,
            body,
        };
        parse_request(&parts).unwrap().query
    }

    #[test]
    fn literals_never_appear_in_sql() {
        let catalog = catalog();
        let query = translate("GET", "products", "product_id=eq.999&product_name=eq.Chai", None);
        let rendered = Renderer::new(&catalog).render(&query, false).unwrap();
        assert_eq!(
            rendered.params,
            vec![Some("999".to_string()), Some("Chai".to_string())]
        );
        for param in rendered.params.iter().flatten() {
            assert!(!rendered.sql.contains(param.as_str()), "{}", rendered.sql);
        }
        assert!(rendered.sql.contains("$1::int4"));
        assert!(rendered.sql.contains("$2::text"));
    }

    #[test]
    fn embed_renders_lateral_join() {
        let catalog = catalog();
        let query = translate(
            "GET",
            "products",
            "select=product_name,categories(category_name)&limit=2",
            None,
        );
        let rendered = Renderer::new(&catalog).render(&query, false).unwrap();
        assert!(rendered.sql.contains("LEFT JOIN LATERAL"));
        assert!(rendered.sql.contains("row_to_json"));
        // To-one embeds must not aggregate into arrays; the only
        // json_agg is the outer row-collection shell.
        assert_eq!(rendered.sql.matches("json_agg").count(), 1);
        assert!(rendered.sql.contains("AS \"categories\""));
        assert!(rendered.sql.contains("LIMIT 2)"));
        assert!(rendered.returns_rows);
    }

    #[test]
    fn to_many_embed_defaults_to_empty_array() {
        let catalog = catalog();
        let query = translate("GET", "categories", "select=category_name,products(*)", None);
        let rendered = Renderer::new(&catalog).render(&query, false).unwrap();
        assert!(rendered.sql.contains("COALESCE(json_agg(row_to_json"));
        assert!(rendered.sql.contains("'[]'::json"));
    }

    #[test]
    fn embed_filter_stays_inside_the_lateral() {
        let catalog = catalog();
        let query = translate(
            "GET",
            "products",
            "select=product_name,categories(category_name)&categories.category_name=eq.Beverages",
            None,
        );
        let rendered = Renderer::new(&catalog).render(&query, false).unwrap();
        // The embed condition lives inside the lateral subquery, after
        // its correlation clause; the outer query has no WHERE.
        let outer = rendered.sql.rsplit("ON TRUE").next().unwrap_or("");
        assert!(!outer.contains("WHERE"), "{}", rendered.sql);
        assert_eq!(rendered.params, vec![Some("Beverages".to_string())]);
    }

    #[test]
    fn unknown_embed_is_a_relationship_error() {
        let catalog = catalog();
        let query = translate("GET", "products", "select=product_name,suppliers(*)", None);
        let err = Renderer::new(&catalog).render(&query, false).unwrap_err();
        assert!(matches!(err, RestError::UnknownRelationship { .. }));
    }

    #[test]
    fn upsert_renders_on_conflict_update() {
        let catalog = catalog();
        let body = json!({"product_id": 1, "product_name": "Chai", "unit_price": 18.0});
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
        let query = parse_request(&parts).unwrap().query;
        let rendered = Renderer::new(&catalog).render(&query, false).unwrap();
        assert!(rendered.sql.contains("ON CONFLICT (\"product_id\") DO UPDATE SET"));
        assert!(rendered.sql.contains("\"product_name\" = EXCLUDED.\"product_name\""));
        assert!(rendered.sql.contains("$3::numeric"));
    }

    #[test]
    fn representation_write_wraps_in_cte() {
        let catalog = catalog();
        let body = json!({"product_name": "Tea"});
        let query = translate(
            "PATCH",
            "products",
            "product_id=eq.7&select=product_id,product_name",
            Some(&body),
        );
        let rendered = Renderer::new(&catalog).render(&query, true).unwrap();
        assert!(rendered.sql.starts_with("WITH _mutated AS (UPDATE"));
        assert!(rendered.sql.contains("RETURNING _t0.*"));
        assert!(rendered.sql.contains("FROM _mutated"));
        // SET param before WHERE param.
        assert_eq!(
            rendered.params,
            vec![Some("Tea".to_string()), Some("7".to_string())]
        );
    }

    #[test]
    fn delete_without_representation_is_bare() {
        let catalog = catalog();
        let query = translate("DELETE", "products", "product_id=eq.7", None);
        let rendered = Renderer::new(&catalog).render(&query, false).unwrap();
        assert!(rendered.sql.starts_with("DELETE FROM \"products\""));
        assert!(!rendered.sql.contains("RETURNING"));
    }

    #[test]
    fn empty_in_list_renders_false() {
        let catalog = catalog();
        let query = translate("GET", "products", "product_id=in.()", None);
        let rendered = Renderer::new(&catalog).render(&query, false).unwrap();
        assert!(rendered.sql.contains("FALSE"));
        assert!(rendered.params.is_empty());
    }

    #[test]
    fn count_query_keeps_filters_drops_paging() {
        let catalog = catalog();
        let query = translate("GET", "products", "unit_price=gt.10&limit=5&offset=10", None);
        let rendered = Renderer::new(&catalog)
            .render_count(&query)
            .unwrap()
            .unwrap();
        assert!(rendered.sql.starts_with("SELECT count(*)"));
        assert!(rendered.sql.contains("$1::numeric"));
        assert!(!rendered.sql.contains("LIMIT"));
        assert!(!rendered.sql.contains("OFFSET"));
    }

    #[test]
    fn rpc_renders_named_arguments() {
        let catalog = catalog();
        let body = json!({"lower": 10, "upper": 20});
        let parts = RequestParts {
            method: "POST",
            target: "products_in_range",
            is_rpc: true,
            query_string: "select=product_name&unit_price=lt.15",
            prefer: None,
            accept: None,
            range: None,
            range_unit: None,
            body: Some(&body),
        };
        let query = parse_request(&parts).unwrap().query;
        let rendered = Renderer::new(&catalog).render(&query, false).unwrap();
        assert!(rendered.sql.contains("\"products_in_range\"(\"lower\" := $1::numeric, \"upper\" := $2::numeric)"));
        assert!(rendered.sql.contains("$3"));
        assert_eq!(rendered.params.len(), 3);
    }

    #[test]
    fn unknown_function_is_reported() {
        let catalog = catalog();
        let parts = RequestParts {
            method: "POST",
            target: "missing_fn",
            is_rpc: true,
            query_string: "",
            prefer: None,
            accept: None,
            range: None,
            range_unit: None,
            body: None,
        };
        let query = parse_request(&parts).unwrap().query;
        let err = Renderer::new(&catalog).render(&query, false).unwrap_err();
        assert!(matches!(err, RestError::UnknownFunction(_)));
    }

    #[test]
    fn array_values_become_pg_literals() {
        assert_eq!(
            json_param(&json!(["a", "b,c", "d\"e"]), Some("text[]")),
            Some("{\"a\",\"b,c\",\"d\\\"e\"}".to_string())
        );
        assert_eq!(
            json_param(&json!({"k": 1}), Some("jsonb")),
            Some("{\"k\":1}".to_string())
        );
        assert_eq!(json_param(&Value::Null, Some("int4")), None);
    }
}
