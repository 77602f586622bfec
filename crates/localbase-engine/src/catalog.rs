//! Schema introspection.
//!
//! Builds a snapshot of the public schema (tables, columns with their
//! Postgres types, primary keys, foreign keys, functions) that the query
//! translator uses to resolve embedded resources, choose parameter casts,
//! and look up RPC signatures. The snapshot is cached per engine and
//! invalidated after raw DDL runs.

use crate::adapter::Session;
use crate::error::EngineError;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    /// Postgres internal type name (`int4`, `numeric`, `_text` for
    /// arrays).
    pub udt_name: String,
}

#[derive(Debug, Clone)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKey>,
}

#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub name: String,
    pub returns_set: bool,
    /// Argument name/type pairs in declaration order.
    pub args: Vec<(String, String)>,
}

/// Which side of a relationship the embedded table sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelKind {
    /// The parent table holds the foreign key; the embed is a single row.
    ToOne,
    /// The embedded table references the parent; the embed is a list.
    ToMany,
}

/// A resolved join between a parent query and an embedded table.
#[derive(Debug, Clone)]
pub struct Relationship {
    pub kind: RelKind,
    pub constraint: String,
    /// Columns on the parent table.
    pub local_columns: Vec<String>,
    /// Columns on the embedded table.
    pub foreign_columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum RelationshipLookup {
    Found(Relationship),
    /// More than one candidate and no hint to pick one; carries the
    /// candidate constraint names.
    Ambiguous(Vec<String>),
    NotFound,
}

#[derive(Debug, Default)]
pub struct SchemaCatalog {
    tables: HashMap<String, TableInfo>,
    functions: HashMap<String, FunctionInfo>,
}

impl SchemaCatalog {
    pub fn table(&self, name: &str) -> Option<&TableInfo> {
        self.tables.get(name)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.get(name)
    }

    /// Cast expression for a column, e.g. `int4`, `numeric`, `text[]`.
    /// Unknown tables or columns yield no cast; the engine then reports
    /// the undefined column itself.
    pub fn cast_type(&self, table: &str, column: &str) -> Option<String> {
        let info = self.tables.get(table)?;
        let col = info.columns.iter().find(|c| c.name == column)?;
        Some(cast_from_udt(&col.udt_name))
    }

    /// Resolve the join between `from` and an embedded table `to`,
    /// optionally disambiguated by a foreign-key hint (constraint name or
    /// FK column name).
    pub fn relationship(&self, from: &str, to: &str, hint: Option<&str>) -> RelationshipLookup {
        let mut candidates = Vec::new();

        if let Some(parent) = self.tables.get(from) {
            for fk in &parent.foreign_keys {
                if fk.referenced_table == to {
                    candidates.push(Relationship {
                        kind: RelKind::ToOne,
                        constraint: fk.name.clone(),
                        local_columns: fk.columns.clone(),
                        foreign_columns: fk.referenced_columns.clone(),
                    });
                }
            }
        }
        if let Some(child) = self.tables.get(to) {
            for fk in &child.foreign_keys {
                if fk.referenced_table == from {
                    candidates.push(Relationship {
                        kind: RelKind::ToMany,
                        constraint: fk.name.clone(),
                        local_columns: fk.referenced_columns.clone(),
                        foreign_columns: fk.columns.clone(),
                    });
                }
            }
        }

        if let Some(hint) = hint {
            candidates.retain(|rel| {
                rel.constraint == hint
                    || rel.local_columns.iter().any(|c| c == hint)
                    || rel.foreign_columns.iter().any(|c| c == hint)
            });
        }

        match candidates.len() {
            0 => RelationshipLookup::NotFound,
            1 => RelationshipLookup::Found(candidates.remove(0)),
            _ => RelationshipLookup::Ambiguous(
                candidates.into_iter().map(|rel| rel.constraint).collect(),
            ),
        }
    }

    /// Introspect the public schema through an open engine session.
    pub async fn introspect(session: &mut Session<'_>) -> Result<Self, EngineError> {
        #[derive(Deserialize)]
        struct ColumnRow {
            table_name: String,
            column_name: String,
            udt_name: String,
        }

        let rows = session
            .query(
                r#"
                SELECT c.table_name, c.column_name, c.udt_name
                FROM information_schema.columns c
                JOIN information_schema.tables t
                  ON t.table_schema = c.table_schema
                 AND t.table_name = c.table_name
                WHERE c.table_schema = 'public'
                  AND t.table_type IN ('BASE TABLE', 'VIEW')
                ORDER BY c.table_name, c.ordinal_position
                "#,
                &[],
            )
            .await?;

        let mut tables: HashMap<String, TableInfo> = HashMap::new();
        for row in rows.rows {
            let col: ColumnRow =
                serde_json::from_value(row).map_err(|e| EngineError::Protocol(e.to_string()))?;
            tables
                .entry(col.table_name.clone())
                .or_insert_with(|| TableInfo {
                    name: col.table_name.clone(),
                    columns: Vec::new(),
                    primary_key: Vec::new(),
                    foreign_keys: Vec::new(),
                })
                .columns
                .push(ColumnInfo {
                    name: col.column_name,
                    udt_name: col.udt_name,
                });
        }

        #[derive(Deserialize)]
        struct PkRow {
            table_name: String,
            column_name: String,
        }

        let rows = session
            .query(
                r#"
                SELECT tc.table_name, kcu.column_name
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage kcu
                  ON tc.constraint_name = kcu.constraint_name
                 AND tc.table_schema = kcu.table_schema
                WHERE tc.constraint_type = 'PRIMARY KEY'
                  AND tc.table_schema = 'public'
                ORDER BY tc.table_name, kcu.ordinal_position
                "#,
                &[],
            )
            .await?;

        for row in rows.rows {
            let pk: PkRow =
                serde_json::from_value(row).map_err(|e| EngineError::Protocol(e.to_string()))?;
            if let Some(table) = tables.get_mut(&pk.table_name) {
                table.primary_key.push(pk.column_name);
            }
        }

        #[derive(Deserialize)]
        struct FkRow {
            constraint_name: String,
            table_name: String,
            column_name: String,
            foreign_table_name: String,
            foreign_column_name: String,
        }

        let rows = session
            .query(
                r#"
                SELECT
                  tc.constraint_name,
                  tc.table_name,
                  kcu.column_name,
                  ccu.table_name AS foreign_table_name,
                  ccu.column_name AS foreign_column_name
                FROM information_schema.table_constraints tc
                JOIN information_schema.key_column_usage kcu
                  ON tc.constraint_name = kcu.constraint_name
                 AND tc.table_schema = kcu.table_schema
                JOIN information_schema.constraint_column_usage ccu
                  ON ccu.constraint_name = tc.constraint_name
                 AND ccu.table_schema = tc.table_schema
                WHERE tc.constraint_type = 'FOREIGN KEY'
                  AND tc.table_schema = 'public'
                ORDER BY tc.table_name, tc.constraint_name, kcu.ordinal_position
                "#,
                &[],
            )
            .await?;

        for row in rows.rows {
            let fk: FkRow =
                serde_json::from_value(row).map_err(|e| EngineError::Protocol(e.to_string()))?;
            if let Some(table) = tables.get_mut(&fk.table_name) {
                match table
                    .foreign_keys
                    .iter_mut()
                    .find(|existing| existing.name == fk.constraint_name)
                {
                    Some(existing) => {
                        existing.columns.push(fk.column_name);
                        existing.referenced_columns.push(fk.foreign_column_name);
                    }
                    None => table.foreign_keys.push(ForeignKey {
                        name: fk.constraint_name,
                        columns: vec![fk.column_name],
                        referenced_table: fk.foreign_table_name,
                        referenced_columns: vec![fk.foreign_column_name],
                    }),
                }
            }
        }

        #[derive(Deserialize)]
        struct FnRow {
            name: String,
            returns_set: bool,
            arg_names: Vec<String>,
            arg_types: Vec<String>,
        }

        let rows = session
            .query(
                r#"
                SELECT p.proname AS name,
                       p.proretset AS returns_set,
                       COALESCE(p.proargnames, ARRAY[]::text[]) AS arg_names,
                       ARRAY(SELECT format_type(t, NULL)
                             FROM unnest(p.proargtypes) AS t) AS arg_types
                FROM pg_proc p
                JOIN pg_namespace n ON n.oid = p.pronamespace
                WHERE n.nspname = 'public' AND p.prokind = 'f'
                "#,
                &[],
            )
            .await?;

        let mut functions = HashMap::new();
        for row in rows.rows {
            let f: FnRow =
                serde_json::from_value(row).map_err(|e| EngineError::Protocol(e.to_string()))?;
            let args = f
                .arg_names
                .iter()
                .cloned()
                .zip(f.arg_types.iter().cloned())
                .collect();
            functions.insert(
                f.name.clone(),
                FunctionInfo {
                    name: f.name,
                    returns_set: f.returns_set,
                    args,
                },
            );
        }

        Ok(Self { tables, functions })
    }

    /// Build a catalog from already-known parts. Used by tests and by
    /// callers that manage their own introspection.
    pub fn from_parts(
        tables: HashMap<String, TableInfo>,
        functions: HashMap<String, FunctionInfo>,
    ) -> Self {
        Self { tables, functions }
    }
}

impl crate::adapter::Engine {
    /// The cached schema snapshot, introspecting on first use.
    pub async fn catalog(&self) -> Result<std::sync::Arc<SchemaCatalog>, EngineError> {
        if let Some(catalog) = self.catalog.read().await.clone() {
            return Ok(catalog);
        }
        let ctx = localbase_core::SessionContext::service_role();
        let mut session = self.session(&ctx).await?;
        let result = SchemaCatalog::introspect(&mut session).await;
        session.close().await;
        let catalog = std::sync::Arc::new(result?);
        *self.catalog.write().await = Some(catalog.clone());
        Ok(catalog)
    }

    /// Drop the cached snapshot; the next data request re-introspects.
    /// Called after raw SQL runs, which may have changed the schema.
    pub async fn invalidate_catalog(&self) {
        *self.catalog.write().await = None;
    }
}

fn cast_from_udt(udt: &str) -> String {
    match udt.strip_prefix('_') {
        Some(element) => format!("{element}[]"),
        None => udt.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
                        name: "tags".into(),
                        udt_name: "_text".into(),
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
                columns: vec![ColumnInfo {
                    name: "category_id".into(),
                    udt_name: "int4".into(),
                }],
                primary_key: vec!["category_id".into()],
                foreign_keys: vec![],
            },
        );
        SchemaCatalog::from_parts(tables, HashMap::new())
    }

    #[test]
    fn cast_type_handles_arrays() {
        let catalog = catalog();
        assert_eq!(
            catalog.cast_type("products", "product_id").as_deref(),
            Some("int4")
        );
        assert_eq!(
            catalog.cast_type("products", "tags").as_deref(),
            Some("text[]")
        );
        assert_eq!(catalog.cast_type("products", "missing"), None);
    }

    #[test]
    fn to_one_relationship_from_fk_holder() {
        let catalog = catalog();
        match catalog.relationship("products", "categories", None) {
            RelationshipLookup::Found(rel) => {
                assert_eq!(rel.kind, RelKind::ToOne);
                assert_eq!(rel.local_columns, vec!["category_id"]);
            }
            other => panic!("expected to-one relationship, got {other:?}"),
        }
    }

    #[test]
    fn to_many_relationship_reverses() {
        let catalog = catalog();
        match catalog.relationship("categories", "products", None) {
            RelationshipLookup::Found(rel) => {
                assert_eq!(rel.kind, RelKind::ToMany);
                assert_eq!(rel.local_columns, vec!["category_id"]);
                assert_eq!(rel.foreign_columns, vec!["category_id"]);
            }
            other => panic!("expected to-many relationship, got {other:?}"),
        }
    }

    #[test]
    fn unknown_relationship_is_not_found() {
        let catalog = catalog();
        assert!(matches!(
            catalog.relationship("products", "suppliers", None),
            RelationshipLookup::NotFound
        ));
    }
}
