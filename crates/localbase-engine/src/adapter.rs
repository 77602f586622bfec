//! The engine adapter.
//!
//! Wraps one dedicated Postgres connection per project. All SQL for a
//! project flows through [`Engine::session`], which serialises logical
//! requests on a fair async mutex (the binder's FIFO queue) and binds the
//! request's session context before any statement runs.
//!
//! Binding works the way PostgREST does it: `set_config('request.jwt.*')`
//! plus `SET ROLE`, so row-level-security policies and the `auth.uid()` /
//! `auth.role()` / `auth.jwt()` helpers observe the request identity. The
//! context is cleared when the session is closed, and defensively reset
//! before the next bind, so a cancelled request can never leak its
//! context into a later one: the mutex is the only path to the
//! connection.

use crate::error::EngineError;
use localbase_core::{EngineSettings, SessionContext};
use sqlx::{Connection, PgConnection};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, RwLock};

const STATUS_READY: u8 = 1;
const STATUS_CLOSED: u8 = 2;

/// Result of one statement.
#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    /// Column names in result order; empty for statements without rows.
    pub columns: Vec<String>,
    /// Rows as JSON objects.
    pub rows: Vec<serde_json::Value>,
    pub rows_affected: u64,
}

impl QueryOutput {
    fn from_rows(rows: Vec<serde_json::Value>) -> Self {
        let columns = rows
            .first()
            .and_then(|r| r.as_object())
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();
        let rows_affected = rows.len() as u64;
        Self {
            columns,
            rows,
            rows_affected,
        }
    }
}

/// A statement plus its positional text parameters. Parameters bind as
/// text; the SQL carries explicit casts where the column type requires
/// one.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Option<String>>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<Option<String>>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// One project's database engine.
pub struct Engine {
    url: String,
    database: String,
    timeout: Duration,
    status: AtomicU8,
    conn: Mutex<Option<PgConnection>>,
    pub(crate) catalog: RwLock<Option<std::sync::Arc<crate::catalog::SchemaCatalog>>>,
}

impl Engine {
    /// Connect to the project database with bounded exponential backoff,
    /// then install roles and the `auth.*` helper functions.
    pub async fn connect(
        url: &str,
        database: &str,
        settings: &EngineSettings,
    ) -> Result<Self, EngineError> {
        let attempts = settings.connect_attempts.max(1);
        let mut conn = None;
        let mut last_err = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(100 * (1 << attempt))).await;
            }
            match PgConnection::connect(url).await {
                Ok(c) => {
                    conn = Some(c);
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        database,
                        attempt = attempt + 1,
                        error = %e,
                        "engine connect attempt failed"
                    );
                    last_err = Some(e);
                }
            }
        }
        let mut conn = conn.ok_or_else(|| EngineError::ConnectFailed {
            database: database.to_string(),
            attempts,
            source: last_err.unwrap_or(sqlx::Error::PoolClosed),
        })?;

        crate::bootstrap::install(&mut conn).await?;

        tracing::info!(database, "engine ready");
        Ok(Self {
            url: url.to_string(),
            database: database.to_string(),
            timeout: Duration::from_secs(settings.statement_timeout_secs),
            status: AtomicU8::new(STATUS_READY),
            conn: Mutex::new(Some(conn)),
            catalog: RwLock::new(None),
        })
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn is_closed(&self) -> bool {
        self.status.load(Ordering::SeqCst) == STATUS_CLOSED
    }

    /// Acquire the engine for one logical request and bind `ctx`.
    ///
    /// Waiters are served in acquisition order; dropping a waiting future
    /// leaves the queue without ever touching the connection.
    pub async fn session(&self, ctx: &SessionContext) -> Result<Session<'_>, EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        let mut guard = self.conn.lock().await;
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        if guard.is_none() {
            // A previous timeout or protocol error dropped the
            // connection. Reconnect once; fail fast otherwise.
            *guard = Some(PgConnection::connect(&self.url).await.map_err(|e| {
                EngineError::ConnectFailed {
                    database: self.database.clone(),
                    attempts: 1,
                    source: e,
                }
            })?);
        }
        let mut session = Session {
            engine: self,
            guard,
        };
        session.bind(ctx).await?;
        Ok(session)
    }

    /// Run `statements` inside one transaction under `ctx`. Rolls back on
    /// the first failure.
    pub async fn transaction(
        &self,
        ctx: &SessionContext,
        statements: Vec<Statement>,
    ) -> Result<Vec<QueryOutput>, EngineError> {
        let mut session = self.session(ctx).await?;
        session.execute("BEGIN", &[]).await?;
        let mut outputs = Vec::with_capacity(statements.len());
        for stmt in &statements {
            match session.query(&stmt.sql, &stmt.params).await {
                Ok(out) => outputs.push(out),
                Err(e) => {
                    let _ = session.execute("ROLLBACK", &[]).await;
                    session.close().await;
                    return Err(e);
                }
            }
        }
        session.execute("COMMIT", &[]).await?;
        session.close().await;
        Ok(outputs)
    }

    /// Tear the engine down, waiting for the in-flight request to finish.
    pub async fn close(&self) {
        self.status.store(STATUS_CLOSED, Ordering::SeqCst);
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.take() {
            let _ = conn.close().await;
        }
        tracing::info!(database = %self.database, "engine closed");
    }
}

/// An exclusive, context-bound hold on the engine connection.
pub struct Session<'a> {
    engine: &'a Engine,
    guard: MutexGuard<'a, Option<PgConnection>>,
}

impl Session<'_> {
    async fn bind(&mut self, ctx: &SessionContext) -> Result<(), EngineError> {
        let claims = ctx.claims.to_string();
        let sub = ctx.user_id.map(|u| u.to_string()).unwrap_or_default();
        let role = ctx.role.as_str();

        // Clear anything a cancelled request may have left behind, then
        // install the new context.
        self.raw_execute("RESET ROLE; RESET ALL;").await?;
        self.execute(
            "SELECT set_config('request.jwt.claims', $1, false), \
             set_config('request.jwt.claim.sub', $2, false), \
             set_config('request.jwt.claim.role', $3, false)",
            &[Some(claims), Some(sub), Some(role.to_string())],
        )
        .await?;
        // Role names come from a closed enum, never from input.
        self.raw_execute(&format!("SET ROLE {role}")).await?;
        Ok(())
    }

    /// Clear the session context and release the connection.
    pub async fn close(mut self) {
        let _ = self.raw_execute("RESET ROLE; RESET ALL;").await;
    }

    fn conn(&mut self) -> Result<&mut PgConnection, EngineError> {
        self.guard.as_mut().ok_or(EngineError::Closed)
    }

    fn poison(&mut self) {
        *self.guard = None;
    }

    /// Run a row-returning statement and decode rows as JSON objects.
    ///
    /// The statement is wrapped in a `json_agg(row_to_json(..))` shell so
    /// every Postgres type (numerics included) arrives in its JSON form
    /// without per-type decoding.
    pub async fn query(
        &mut self,
        sql: &str,
        params: &[Option<String>],
    ) -> Result<QueryOutput, EngineError> {
        let trimmed = sql.trim().trim_end_matches(';');
        if !returns_rows(trimmed) {
            let affected = self.execute(sql, params).await?;
            return Ok(QueryOutput {
                rows_affected: affected,
                ..Default::default()
            });
        }
        let wrapped = format!(
            "SELECT COALESCE(json_agg(row_to_json(_q)), '[]'::json) FROM ({trimmed}) AS _q"
        );
        let timeout = self.engine.timeout;
        let mut query = sqlx::query_scalar::<_, serde_json::Value>(&wrapped);
        for p in params {
            query = query.bind(p.as_deref());
        }
        let conn = self.conn()?;
        match tokio::time::timeout(timeout, query.fetch_one(conn)).await {
            Err(_) => {
                self.poison();
                Err(EngineError::Timeout {
                    seconds: timeout.as_secs(),
                })
            }
            Ok(Err(e)) => {
                if !matches!(e, sqlx::Error::Database(_)) {
                    self.poison();
                }
                Err(e.into())
            }
            Ok(Ok(value)) => {
                let rows = value.as_array().cloned().unwrap_or_default();
                Ok(QueryOutput::from_rows(rows))
            }
        }
    }

    /// Run a statement for its side effect and report affected rows.
    pub async fn execute(
        &mut self,
        sql: &str,
        params: &[Option<String>],
    ) -> Result<u64, EngineError> {
        let timeout = self.engine.timeout;
        let mut query = sqlx::query(sql);
        for p in params {
            query = query.bind(p.as_deref());
        }
        let conn = self.conn()?;
        match tokio::time::timeout(timeout, query.execute(conn)).await {
            Err(_) => {
                self.poison();
                Err(EngineError::Timeout {
                    seconds: timeout.as_secs(),
                })
            }
            Ok(Err(e)) => {
                if !matches!(e, sqlx::Error::Database(_)) {
                    self.poison();
                }
                Err(e.into())
            }
            Ok(Ok(done)) => Ok(done.rows_affected()),
        }
    }

    /// Run a statement that follows the renderer's JSON convention:
    /// exactly one row with one `json` column holding the array of
    /// result rows. This is how data-modifying statements return their
    /// representation, since DML cannot sit inside a `FROM (...)`
    /// wrapper.
    pub async fn fetch_json(
        &mut self,
        sql: &str,
        params: &[Option<String>],
    ) -> Result<QueryOutput, EngineError> {
        let timeout = self.engine.timeout;
        let mut query = sqlx::query_scalar::<_, serde_json::Value>(sql);
        for p in params {
            query = query.bind(p.as_deref());
        }
        let conn = self.conn()?;
        match tokio::time::timeout(timeout, query.fetch_one(conn)).await {
            Err(_) => {
                self.poison();
                Err(EngineError::Timeout {
                    seconds: timeout.as_secs(),
                })
            }
            Ok(Err(e)) => {
                if !matches!(e, sqlx::Error::Database(_)) {
                    self.poison();
                }
                Err(e.into())
            }
            Ok(Ok(value)) => {
                let rows = value.as_array().cloned().unwrap_or_default();
                Ok(QueryOutput::from_rows(rows))
            }
        }
    }

    /// Run a multi-statement script through the simple-query path. Used
    /// for DDL, seed scripts, and debug SQL.
    pub async fn batch(&mut self, sql: &str) -> Result<u64, EngineError> {
        self.raw_execute(sql).await
    }

    async fn raw_execute(&mut self, sql: &str) -> Result<u64, EngineError> {
        let timeout = self.engine.timeout;
        let conn = self.conn()?;
        match tokio::time::timeout(timeout, sqlx::raw_sql(sql).execute(conn)).await {
            Err(_) => {
                self.poison();
                Err(EngineError::Timeout {
                    seconds: timeout.as_secs(),
                })
            }
            Ok(Err(e)) => {
                if !matches!(e, sqlx::Error::Database(_)) {
                    self.poison();
                }
                Err(e.into())
            }
            Ok(Ok(done)) => Ok(done.rows_affected()),
        }
    }

    /// Execute raw SQL of unknown shape, as the debug endpoint needs:
    /// row-returning statements come back as JSON rows, scripts and DML
    /// report affected counts.
    pub async fn raw(&mut self, sql: &str) -> Result<QueryOutput, EngineError> {
        let trimmed = sql.trim().trim_end_matches(';');
        if statement_count(sql) > 1 {
            let affected = self.batch(sql).await?;
            return Ok(QueryOutput {
                rows_affected: affected,
                ..Default::default()
            });
        }
        if returns_rows(trimmed) {
            return self.query(trimmed, &[]).await;
        }
        let affected = self.execute(trimmed, &[]).await?;
        Ok(QueryOutput {
            rows_affected: affected,
            ..Default::default()
        })
    }
}

/// Whether a single statement can appear in a `FROM (...)` wrapper.
fn returns_rows(sql: &str) -> bool {
    let head = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    matches!(head.as_str(), "SELECT" | "WITH" | "VALUES" | "TABLE")
}

/// Count top-level statements, ignoring semicolons inside quoted strings
/// and dollar-quoted bodies.
fn statement_count(sql: &str) -> usize {
    #[derive(PartialEq)]
    enum Mode {
        Plain,
        Single,
        Double,
        Dollar,
    }
    let bytes = sql.as_bytes();
    let mut mode = Mode::Plain;
    let mut count = 0;
    let mut saw_content = false;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match mode {
            Mode::Plain => match c {
                '\'' => mode = Mode::Single,
                '"' => mode = Mode::Double,
                '$' if bytes.get(i + 1) == Some(&b'$') => {
                    mode = Mode::Dollar;
                    i += 1;
                }
                ';' => {
                    if saw_content {
                        count += 1;
                        saw_content = false;
                    }
                }
                c if !c.is_whitespace() => saw_content = true,
                _ => {}
            },
            Mode::Single => {
                if c == '\'' {
                    mode = Mode::Plain;
                }
            }
            Mode::Double => {
                if c == '"' {
                    mode = Mode::Plain;
                }
            }
            Mode::Dollar => {
                if c == '$' && bytes.get(i + 1) == Some(&b'$') {
                    mode = Mode::Plain;
                    i += 1;
                }
            }
        }
        i += 1;
    }
    if saw_content {
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_statements_outside_quotes() {
        assert_eq!(statement_count("SELECT 1"), 1);
        assert_eq!(statement_count("SELECT 1; SELECT 2;"), 2);
        assert_eq!(statement_count("SELECT 'a;b'"), 1);
        assert_eq!(statement_count("DO $$ BEGIN NULL; END $$;"), 1);
        assert_eq!(statement_count("  ;  ; "), 0);
    }

    #[test]
    fn classifies_row_returning_statements() {
        assert!(returns_rows("SELECT 1"));
        assert!(returns_rows("with x as (select 1) select * from x"));
        assert!(!returns_rows("INSERT INTO t VALUES (1)"));
        assert!(!returns_rows("EXPLAIN SELECT 1"));
    }

    #[test]
    fn query_output_columns_from_first_row() {
        let out = QueryOutput::from_rows(vec![
            serde_json::json!({"id": 1, "name": "a"}),
            serde_json::json!({"id": 2, "name": "b"}),
        ]);
        assert_eq!(out.columns, vec!["id", "name"]);
        assert_eq!(out.rows_affected, 2);
    }
}
