mod middleware;
mod respond;
mod routes;
mod state;

use axum::routing::{delete, get, post};
use axum::Router;
use clap::Parser;
use localbase_core::{ApiError, AppConfig};
use state::AppState;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Parser, Debug)]
#[command(name = "localbase-server", about = "Process-local Postgres platform surface")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "localbase.yaml", env = "LOCALBASE_CONFIG")]
    config: std::path::PathBuf,

    /// Override the configured bind address.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = AppConfig::load(&args.config).unwrap_or_else(|err| {
        tracing::warn!("failed to parse config file, using defaults: {err}");
        AppConfig::default()
    });
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let bind = config.server.bind.clone();
    let state = Arc::new(AppState::init(config).await?);
    let app = app(state.clone());

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("localbase listening on {bind}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.registry.close_all().await;
    Ok(())
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        // Auth API
        .route("/auth/v1/signup", post(routes::auth::signup))
        .route("/auth/v1/signin", post(routes::auth::signin))
        .route("/auth/v1/token", post(routes::auth::token))
        .route("/auth/v1/logout", post(routes::auth::logout))
        .route(
            "/auth/v1/user",
            get(routes::auth::get_user).put(routes::auth::update_user),
        )
        .route("/auth/v1/session", get(routes::auth::get_session))
        .route("/auth/v1/recover", post(routes::auth::recover))
        .route("/auth/v1/verify", post(routes::auth::verify))
        .route("/auth/v1/otp", post(routes::auth::otp))
        .route("/auth/v1/magiclink", post(routes::auth::magiclink))
        .route("/auth/v1/resend", post(routes::auth::resend))
        .route(
            "/auth/v1/factors",
            get(routes::auth::list_factors).post(routes::auth::enroll_factor),
        )
        .route("/auth/v1/factors/{id}", delete(routes::auth::delete_factor))
        .route(
            "/auth/v1/factors/{id}/challenge",
            post(routes::auth::challenge_factor),
        )
        .route(
            "/auth/v1/factors/{id}/verify",
            post(routes::auth::verify_factor),
        )
        .route(
            "/auth/v1/admin/users",
            get(routes::auth::admin_list_users).post(routes::auth::admin_create_user),
        )
        .route(
            "/auth/v1/admin/users/{id}",
            get(routes::auth::admin_get_user)
                .put(routes::auth::admin_update_user)
                .delete(routes::auth::admin_delete_user),
        )
        .route("/auth/v1/.well-known/jwks.json", get(routes::auth::jwks))
        // Data API
        .route(
            "/rest/v1/rpc/{function}",
            get(routes::rest::rpc)
                .head(routes::rest::rpc)
                .post(routes::rest::rpc),
        )
        .route(
            "/rest/v1/{table}",
            get(routes::rest::table)
                .head(routes::rest::table)
                .post(routes::rest::table)
                .patch(routes::rest::table)
                .delete(routes::rest::table),
        )
        // Debug SQL
        .route("/debug/sql", post(routes::debug::run_sql))
        .fallback(routes::not_found)
        // Layer order, outermost first at the bottom: panics, tracing,
        // CORS, then the per-request context (project + credentials).
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::context::prepare_request,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

fn handle_panic(_err: Box<dyn std::any::Any + Send + 'static>) -> axum::response::Response {
    tracing::error!("request handler panicked");
    respond::formatted(localbase_rest::format_error(&ApiError::internal(
        "unexpected server error",
    )))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
