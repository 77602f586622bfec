//! The normalised query model.
//!
//! A request parses into one [`ParsedQuery`] variant; the renderer is
//! total over this closed union. Embedded resources recurse: an
//! [`Embed`] carries a full [`SelectQuery`] for its own scope plus the
//! join hint used to resolve the relationship.

use serde_json::Value;

/// Filter operators of the query grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    Ilike,
    In,
    Is,
    /// Array/range containment and adjacency family.
    Cs,
    Cd,
    Ov,
    Sl,
    Sr,
    Nxl,
    Nxr,
    Adj,
    /// Full-text search with an optional regconfig.
    Fts {
        kind: FtsKind,
        config: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtsKind {
    /// `fts` → `to_tsquery`
    Query,
    /// `plfts` → `plainto_tsquery`
    Plain,
    /// `phfts` → `phraseto_tsquery`
    Phrase,
    /// `wfts` → `websearch_to_tsquery`
    Websearch,
}

impl FilterOp {
    pub fn parse(name: &str, config: Option<String>) -> Option<FilterOp> {
        if config.is_some() && !matches!(name, "fts" | "plfts" | "phfts" | "wfts") {
            return None;
        }
        let op = match name {
            "eq" => FilterOp::Eq,
            "neq" => FilterOp::Neq,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "like" => FilterOp::Like,
            "ilike" => FilterOp::Ilike,
            "in" => FilterOp::In,
            "is" => FilterOp::Is,
            "cs" => FilterOp::Cs,
            "cd" => FilterOp::Cd,
            "ov" => FilterOp::Ov,
            "sl" => FilterOp::Sl,
            "sr" => FilterOp::Sr,
            "nxl" => FilterOp::Nxl,
            "nxr" => FilterOp::Nxr,
            "adj" => FilterOp::Adj,
            "fts" => FilterOp::Fts {
                kind: FtsKind::Query,
                config,
            },
            "plfts" => FilterOp::Fts {
                kind: FtsKind::Plain,
                config,
            },
            "phfts" => FilterOp::Fts {
                kind: FtsKind::Phrase,
                config,
            },
            "wfts" => FilterOp::Fts {
                kind: FtsKind::Websearch,
                config,
            },
            _ => return None,
        };
        Some(op)
    }

    /// The grammar name of the operator.
    pub fn name(&self) -> String {
        match self {
            FilterOp::Eq => "eq".into(),
            FilterOp::Neq => "neq".into(),
            FilterOp::Gt => "gt".into(),
            FilterOp::Gte => "gte".into(),
            FilterOp::Lt => "lt".into(),
            FilterOp::Lte => "lte".into(),
            FilterOp::Like => "like".into(),
            FilterOp::Ilike => "ilike".into(),
            FilterOp::In => "in".into(),
            FilterOp::Is => "is".into(),
            FilterOp::Cs => "cs".into(),
            FilterOp::Cd => "cd".into(),
            FilterOp::Ov => "ov".into(),
            FilterOp::Sl => "sl".into(),
            FilterOp::Sr => "sr".into(),
            FilterOp::Nxl => "nxl".into(),
            FilterOp::Nxr => "nxr".into(),
            FilterOp::Adj => "adj".into(),
            FilterOp::Fts { kind, config } => {
                let base = match kind {
                    FtsKind::Query => "fts",
                    FtsKind::Plain => "plfts",
                    FtsKind::Phrase => "phfts",
                    FtsKind::Websearch => "wfts",
                };
                match config {
                    Some(c) => format!("{base}({c})"),
                    None => base.into(),
                }
            }
        }
    }
}

/// Right-hand side of a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    Scalar(String),
    List(Vec<String>),
}

/// A single column condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: FilterValue,
    pub negated: bool,
}

/// A filter tree node: either one condition or a boolean group from
/// `or=(...)` / `and=(...)`.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterNode {
    Cond(Filter),
    Group {
        conjunction: bool,
        negated: bool,
        children: Vec<FilterNode>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    pub column: String,
    pub ascending: bool,
    pub nulls_first: Option<bool>,
}

/// One entry of the `select=` list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Star,
    Column {
        name: String,
        alias: Option<String>,
    },
    Embed(Embed),
}

/// An embedded resource: a recursive query joined onto its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Embed {
    pub alias: Option<String>,
    pub fk_hint: Option<String>,
    pub query: SelectQuery,
}

impl Embed {
    /// The key this embed appears under in the response.
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.query.table)
    }
}

/// Read-shaped clauses, shared by reads, write representations, and RPC
/// result shaping.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: String,
    pub select: Vec<SelectItem>,
    pub filters: Vec<FilterNode>,
    pub order: Vec<OrderTerm>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            select: Vec::new(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertQuery {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Projection applied to the representation, from `select=`.
    pub select: Vec<SelectItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpsertQuery {
    pub insert: InsertQuery,
    /// Conflict target; falls back to the primary key when empty.
    pub on_conflict: Vec<String>,
    /// `resolution=ignore-duplicates` renders DO NOTHING.
    pub ignore_duplicates: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateQuery {
    pub table: String,
    pub set: Vec<(String, Value)>,
    pub filters: Vec<FilterNode>,
    pub select: Vec<SelectItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteQuery {
    pub table: String,
    pub filters: Vec<FilterNode>,
    pub select: Vec<SelectItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
    pub function: String,
    pub args: Vec<(String, Value)>,
    /// Result shaping: filters, order, limits applied over the function's
    /// rows.
    pub query: SelectQuery,
}

/// The closed union the renderer is total over.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedQuery {
    Select(SelectQuery),
    Insert(InsertQuery),
    Upsert(UpsertQuery),
    Update(UpdateQuery),
    Delete(DeleteQuery),
    Rpc(RpcCall),
}

impl ParsedQuery {
    pub fn table(&self) -> &str {
        match self {
            ParsedQuery::Select(q) => &q.table,
            ParsedQuery::Insert(q) => &q.table,
            ParsedQuery::Upsert(q) => &q.insert.table,
            ParsedQuery::Update(q) => &q.table,
            ParsedQuery::Delete(q) => &q.table,
            ParsedQuery::Rpc(q) => &q.function,
        }
    }

    pub fn is_read(&self) -> bool {
        matches!(self, ParsedQuery::Select(_))
    }
}

impl SelectQuery {
    /// Render the canonical query-string form of the read clauses.
    /// Re-parsing this string yields the same `SelectQuery`.
    pub fn canonical_query_string(&self) -> String {
        let mut pairs: Vec<(String, String)> = Vec::new();
        if !self.select.is_empty() {
            pairs.push(("select".into(), render_select_items(&self.select)));
        }
        collect_filter_pairs(&self.filters, "", &mut pairs);
        if !self.order.is_empty() {
            let terms: Vec<String> = self.order.iter().map(render_order_term).collect();
            pairs.push(("order".into(), terms.join(",")));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".into(), limit.to_string()));
        }
        if let Some(offset) = self.offset {
            pairs.push(("offset".into(), offset.to_string()));
        }
        collect_embed_pairs(&self.select, "", &mut pairs);
        let mut out = form_urlencoded::Serializer::new(String::new());
        for (k, v) in pairs {
            out.append_pair(&k, &v);
        }
        out.finish()
    }
}

fn render_select_items(items: &[SelectItem]) -> String {
    let parts: Vec<String> = items
        .iter()
        .map(|item| match item {
            SelectItem::Star => "*".to_string(),
            SelectItem::Column { name, alias } => match alias {
                Some(a) => format!("{a}:{name}"),
                None => name.clone(),
            },
            SelectItem::Embed(embed) => {
                let mut head = String::new();
                if let Some(alias) = &embed.alias {
                    head.push_str(alias);
                    head.push(':');
                }
                head.push_str(&embed.query.table);
                if let Some(hint) = &embed.fk_hint {
                    head.push('!');
                    head.push_str(hint);
                }
                format!("{head}({})", render_select_items(&embed.query.select))
            }
        })
        .collect();
    parts.join(",")
}

fn render_order_term(term: &OrderTerm) -> String {
    let mut out = format!(
        "{}.{}",
        term.column,
        if term.ascending { "asc" } else { "desc" }
    );
    match term.nulls_first {
        Some(true) => out.push_str(".nullsfirst"),
        Some(false) => out.push_str(".nullslast"),
        None => {}
    }
    out
}

fn render_filter_value(filter: &Filter) -> String {
    let mut out = String::new();
    if filter.negated {
        out.push_str("not.");
    }
    out.push_str(&filter.op.name());
    out.push('.');
    match &filter.value {
        FilterValue::Scalar(v) => out.push_str(v),
        FilterValue::List(items) => {
            out.push('(');
            out.push_str(&items.join(","));
            out.push(')');
        }
    }
    out
}

fn render_filter_node(node: &FilterNode) -> String {
    match node {
        FilterNode::Cond(f) => format!("{}.{}", f.column, render_filter_value(f)),
        FilterNode::Group {
            conjunction,
            negated,
            children,
        } => {
            let name = if *conjunction { "and" } else { "or" };
            let inner: Vec<String> = children.iter().map(render_filter_node).collect();
            if *negated {
                format!("not.{name}({})", inner.join(","))
            } else {
                format!("{name}({})", inner.join(","))
            }
        }
    }
}

fn collect_filter_pairs(nodes: &[FilterNode], prefix: &str, pairs: &mut Vec<(String, String)>) {
    for node in nodes {
        match node {
            FilterNode::Cond(f) => {
                let key = if prefix.is_empty() {
                    f.column.clone()
                } else {
                    format!("{prefix}.{}", f.column)
                };
                pairs.push((key, render_filter_value(f)));
            }
            FilterNode::Group {
                conjunction,
                negated,
                children,
            } => {
                let name = if *conjunction { "and" } else { "or" };
                let name = if *negated {
                    format!("not.{name}")
                } else {
                    name.to_string()
                };
                let key = if prefix.is_empty() {
                    name
                } else {
                    format!("{prefix}.{name}")
                };
                let inner: Vec<String> = children.iter().map(render_filter_node).collect();
                pairs.push((key, format!("({})", inner.join(","))));
            }
        }
    }
}

fn collect_embed_pairs(items: &[SelectItem], prefix: &str, pairs: &mut Vec<(String, String)>) {
    for item in items {
        if let SelectItem::Embed(embed) = item {
            let path = if prefix.is_empty() {
                embed.output_name().to_string()
            } else {
                format!("{prefix}.{}", embed.output_name())
            };
            collect_filter_pairs(&embed.query.filters, &path, pairs);
            if !embed.query.order.is_empty() {
                let terms: Vec<String> = embed.query.order.iter().map(render_order_term).collect();
                pairs.push((format!("{path}.order"), terms.join(",")));
            }
            if let Some(limit) = embed.query.limit {
                pairs.push((format!("{path}.limit"), limit.to_string()));
            }
            if let Some(offset) = embed.query.offset {
                pairs.push((format!("{path}.offset"), offset.to_string()));
            }
            collect_embed_pairs(&embed.query.select, &path, pairs);
        }
    }
}
