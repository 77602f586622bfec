//! End-to-end translator tests: query string and headers in,
//! parameterised SQL and formatted responses out. No database required.
//!
//! Run with: cargo test --package localbase-rest --test translate_flow

use localbase_engine::catalog::{ColumnInfo, ForeignKey, TableInfo};
use localbase_engine::SchemaCatalog;
use localbase_rest::{
    format_response, parse_request, ParsedQuery, Renderer, RequestParts, ResponseFormat,
    ResponseInputs, RestError,
};
use serde_json::{json, Value};
use std::collections::HashMap;

/// The seeded schema the translator tests run against: instruments each
/// belong to an orchestral section.
fn catalog() -> SchemaCatalog {
    let mut tables = HashMap::new();
    tables.insert(
        "instruments".to_string(),
        TableInfo {
            name: "instruments".into(),
            columns: vec![
                ColumnInfo {
                    name: "id".into(),
                    udt_name: "int4".into(),
                },
                ColumnInfo {
                    name: "name".into(),
                    udt_name: "text".into(),
                },
                ColumnInfo {
                    name: "section_id".into(),
                    udt_name: "int4".into(),
                },
            ],
            primary_key: vec!["id".into()],
            foreign_keys: vec![ForeignKey {
                name: "instruments_section_id_fkey".into(),
                columns: vec!["section_id".into()],
                referenced_table: "orchestral_sections".into(),
                referenced_columns: vec!["id".into()],
            }],
        },
    );
    tables.insert(
        "orchestral_sections".to_string(),
        TableInfo {
            name: "orchestral_sections".into(),
            columns: vec![
                ColumnInfo {
                    name: "id".into(),
                    udt_name: "int4".into(),
                },
                ColumnInfo {
                    name: "name".into(),
                    udt_name: "text".into(),
                },
            ],
            primary_key: vec!["id".into()],
            foreign_keys: vec![],
        },
    );
    SchemaCatalog::from_parts(tables, HashMap::new())
}

fn get_request<'a>(target: &'a str, query_string: &'a str) -> RequestParts<'a> {
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

#[test]
fn embed_filter_query_translates_without_touching_root() {
    // instruments with their section embedded, filtered on the embed.
    let parts = get_request(
        "instruments",
        "select=name,orchestral_sections(*)&orchestral_sections.name=eq.percussion",
    );
    let translated = parse_request(&parts).unwrap();
    let catalog = catalog();
    let rendered = Renderer::new(&catalog)
        .render(&translated.query, false)
        .unwrap();

    // The only parameter is the embed filter value, bound inside the
    // lateral subquery. Root rows are not filtered.
    assert_eq!(rendered.params, vec![Some("percussion".to_string())]);
    let after_joins = rendered.sql.rsplit("ON TRUE").next().unwrap_or("");
    assert!(
        !after_joins.contains("WHERE"),
        "root query must not gain a WHERE clause: {}",
        rendered.sql
    );
    assert!(rendered.sql.contains("row_to_json"));
}

#[test]
fn all_identifiers_in_rendered_sql_are_validated() {
    let parts = get_request(
        "instruments",
        "select=name,orchestral_sections(id,name)&name=like.v*&order=name.desc.nullslast&limit=3",
    );
    let translated = parse_request(&parts).unwrap();
    let catalog = catalog();
    let rendered = Renderer::new(&catalog)
        .render(&translated.query, false)
        .unwrap();

    // Every double-quoted identifier matches the identifier grammar.
    let re = regex::Regex::new(r#""([^"]*)""#).unwrap();
    let ident = regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    for capture in re.captures_iter(&rendered.sql) {
        assert!(
            ident.is_match(&capture[1]),
            "identifier {:?} fails validation in {}",
            &capture[1],
            rendered.sql
        );
    }
    // The like pattern travels as a parameter with the wildcard mapped.
    assert_eq!(rendered.params, vec![Some("v%".to_string())]);
}

#[test]
fn injection_shaped_input_is_rejected_before_rendering() {
    let parts = get_request("instruments", "select=name;drop table instruments");
    assert!(matches!(
        parse_request(&parts),
        Err(RestError::Parse(_) | RestError::InvalidIdentifier(_))
    ));

    let parts = get_request("instruments;drop", "");
    assert!(matches!(
        parse_request(&parts),
        Err(RestError::InvalidIdentifier(_))
    ));
}

#[test]
fn single_object_flow_errors_on_zero_rows() {
    let parts = RequestParts {
        accept: Some("application/vnd.pgrst.object+json"),
        ..get_request("instruments", "id=eq.1")
    };
    let translated = parse_request(&parts).unwrap();
    assert_eq!(translated.format, ResponseFormat::SingleJson);

    let err = format_response(ResponseInputs {
        method: "GET".into(),
        head: false,
        format: translated.format,
        prefs: translated.prefs,
        rows: vec![],
        columns: vec![],
        rows_affected: 0,
        offset: 0,
        total: None,
    })
    .unwrap_err();
    assert!(matches!(err, RestError::SingularityViolation { count: 0 }));
}

#[test]
fn csv_flow_preserves_column_order() {
    let parts = RequestParts {
        accept: Some("text/csv"),
        ..get_request("instruments", "select=name,id")
    };
    let translated = parse_request(&parts).unwrap();
    let out = format_response(ResponseInputs {
        method: "GET".into(),
        head: false,
        format: translated.format,
        prefs: translated.prefs,
        rows: vec![
            json!({"name": "violin", "id": 2}),
            json!({"name": "flute", "id": 1}),
        ],
        columns: vec!["name".into(), "id".into()],
        rows_affected: 2,
        offset: 0,
        total: None,
    })
    .unwrap();
    assert_eq!(out.body.as_deref(), Some("name,id\nviolin,2\nflute,1\n"));
    assert_eq!(out.content_type.as_deref(), Some("text/csv"));
}

#[test]
fn count_preference_yields_count_query_and_content_range() {
    let parts = RequestParts {
        prefer: Some("count=exact"),
        ..get_request("instruments", "limit=2&offset=2")
    };
    let translated = parse_request(&parts).unwrap();
    let catalog = catalog();
    let renderer = Renderer::new(&catalog);
    let count = renderer
        .render_count(&translated.query)
        .unwrap()
        .expect("reads have a count query");
    assert!(count.sql.starts_with("SELECT count(*)"));

    let out = format_response(ResponseInputs {
        method: "GET".into(),
        head: false,
        format: translated.format,
        prefs: translated.prefs,
        rows: vec![json!({"id": 3}), json!({"id": 4})],
        columns: vec!["id".into()],
        rows_affected: 2,
        offset: 2,
        total: Some(7),
    })
    .unwrap();
    let range = out
        .headers
        .iter()
        .find(|(k, _)| k == "Content-Range")
        .map(|(_, v)| v.as_str());
    assert_eq!(range, Some("2-3/7"));
}

#[test]
fn parse_render_reparse_fixpoint() {
    let query_strings = [
        "select=id,name&name=eq.violin&order=id.desc&limit=1",
        "select=name,orchestral_sections(id,name)&orchestral_sections.name=eq.strings",
        "or=(id.lt.3,and(name.like.v*,id.gt.0))",
        "id=in.(1,2,3)&name=not.is.null",
    ];
    for qs in query_strings {
        let first = match parse_request(&get_request("instruments", qs)).unwrap().query {
            ParsedQuery::Select(q) => q,
            other => panic!("expected select for {qs}, got {other:?}"),
        };
        let canonical = first.canonical_query_string();
        let second = match parse_request(&get_request("instruments", &canonical))
            .unwrap()
            .query
        {
            ParsedQuery::Select(q) => q,
            other => panic!("expected select for {canonical}, got {other:?}"),
        };
        assert_eq!(first, second, "round trip diverged for {qs}");
    }
}

#[test]
fn write_flow_shapes_by_preference() {
    let body: Value = json!({"name": "oboe", "section_id": 1});
    let base = RequestParts {
        method: "POST",
        target: "instruments",
        is_rpc: false,
        query_string: "",
        prefer: None,
        accept: None,
        range: None,
        range_unit: None,
        body: Some(&body),
    };
    let catalog = catalog();
    let renderer = Renderer::new(&catalog);

    // Minimal: a bare INSERT, 201 with no body.
    let translated = parse_request(&base).unwrap();
    let rendered = renderer.render(&translated.query, false).unwrap();
    assert!(rendered.sql.starts_with("INSERT INTO \"instruments\""));
    assert!(!rendered.sql.contains("RETURNING"));
    let out = format_response(ResponseInputs {
        method: "POST".into(),
        head: false,
        format: translated.format,
        prefs: translated.prefs,
        rows: vec![],
        columns: vec![],
        rows_affected: 1,
        offset: 0,
        total: None,
    })
    .unwrap();
    assert_eq!(out.status, 201);
    assert!(out.body.is_none());

    // Representation: CTE-wrapped insert returning the projection.
    let parts = RequestParts {
        prefer: Some("return=representation"),
        query_string: "select=id,name",
        ..base
    };
    let translated = parse_request(&parts).unwrap();
    let rendered = renderer.render(&translated.query, true).unwrap();
    assert!(rendered.sql.starts_with("WITH _mutated AS (INSERT"));
    assert!(rendered.sql.contains("RETURNING *"));
    let out = format_response(ResponseInputs {
        method: "POST".into(),
        head: false,
        format: translated.format,
        prefs: translated.prefs,
        rows: vec![json!({"id": 9, "name": "oboe"})],
        columns: vec!["id".into(), "name".into()],
        rows_affected: 1,
        offset: 0,
        total: None,
    })
    .unwrap();
    assert_eq!(out.status, 201);
    assert_eq!(out.body.as_deref(), Some(r#"[{"id":9,"name":"oboe"}]"#));
}
