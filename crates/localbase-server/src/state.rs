//! Shared application state.

use localbase_auth::{AuthCore, JwtCodec, PgAuthStore, SCHEMA_SQL};
use localbase_core::{AppConfig, ProjectMeta};
use localbase_engine::{Engine, ProjectRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<ProjectRegistry>,
    pub jwt: Arc<JwtCodec>,
    /// One auth core per project; holds the refresh-failure window, so
    /// it must outlive individual requests.
    auth_cores: RwLock<HashMap<String, Arc<AuthCore>>>,
}

/// Everything a request needs from its resolved project, carried in
/// request extensions.
#[derive(Clone)]
pub struct ProjectContext {
    pub meta: ProjectMeta,
    pub engine: Arc<Engine>,
    pub auth: Arc<AuthCore>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let registry = Arc::new(ProjectRegistry::open(
            &config.database,
            config.engine.clone(),
            vec![SCHEMA_SQL.to_string()],
        )?);
        registry.ensure_default().await?;

        let jwt = Arc::new(JwtCodec::new(&config.jwt));
        Ok(Self {
            config,
            registry,
            jwt,
            auth_cores: RwLock::new(HashMap::new()),
        })
    }

    /// The project's auth core, created on first use.
    pub async fn auth_core(&self, project_id: &str, engine: Arc<Engine>) -> Arc<AuthCore> {
        if let Some(core) = self.auth_cores.read().await.get(project_id) {
            return core.clone();
        }
        let mut cores = self.auth_cores.write().await;
        cores
            .entry(project_id.to_string())
            .or_insert_with(|| {
                Arc::new(AuthCore::new(
                    Arc::new(PgAuthStore::new(engine)),
                    self.jwt.clone(),
                    self.config.auth.clone(),
                ))
            })
            .clone()
    }

    /// Forget a project's cached auth core after the project is deleted.
    pub async fn drop_auth_core(&self, project_id: &str) {
        self.auth_cores.write().await.remove(project_id);
    }
}
