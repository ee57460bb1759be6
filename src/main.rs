//! Stockpilot - autonomous supply-chain replenishment controller
//!
//! On every scheduler tick (or operator request) the agent snapshots
//! inventory and sales, forecasts demand, derives reorder decisions,
//! runs them past a budget-optimizing Finance review with one round of
//! quantity negotiation, executes approved orders, and archives the
//! cycle to long-term memory.

use stockpilot_backend::agent::llm::{DemandEstimator, DialoguePort, LlmClient};
use stockpilot_backend::agent::pipeline::PipelineDriver;
use stockpilot_backend::agent::scheduler::AgentScheduler;
use stockpilot_backend::api::{agent_api, persistence_api, routes, AppState};
use stockpilot_backend::auth::{api as auth_api, auth_middleware, AuthState, JwtHandler, UserStore};
use stockpilot_backend::models::Config;
use stockpilot_backend::simulation;
use stockpilot_backend::store::{InventoryStore, JobStore, MemoryStore};
use anyhow::{Context, Result};
use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::{env, sync::Arc};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = Config::from_env();

    info!("🚀 Stockpilot replenishment agent starting");

    // Stores share one operational database; WAL handles the readers.
    let store = Arc::new(InventoryStore::new(&config.database_path)?);
    let memory = Arc::new(MemoryStore::new(&config.database_path)?);
    let jobs = Arc::new(JobStore::new(&config.database_path)?);
    info!("📊 Database initialized at: {}", config.database_path);

    // Any job left running by a previous process can never complete.
    jobs.fail_interrupted()?;
    if let Some(checkpoint) = memory.latest_stable_checkpoint()? {
        info!(
            "♻️ Latest stable checkpoint: {} (cycle {})",
            checkpoint.checkpoint_id, checkpoint.cycle_number
        );
    }

    // Auth
    let user_store = Arc::new(UserStore::new(
        &config.auth_db_path,
        &config.admin_username,
        &config.admin_password,
    )?);
    let jwt_handler = Arc::new(JwtHandler::new(config.jwt_secret.clone()));
    let auth_state = AuthState {
        user_store,
        jwt_handler: jwt_handler.clone(),
    };
    info!("🔐 Authentication initialized at: {}", config.auth_db_path);

    // External estimator + dialogue ports share one client when an API
    // key is configured; otherwise the deterministic fallbacks run.
    let (estimator, dialogue_port): (
        Option<Arc<dyn DemandEstimator>>,
        Option<Arc<dyn DialoguePort>>,
    ) = match LlmClient::from_config(&config) {
        Some(client) => {
            info!("🧠 External estimator enabled ({})", config.llm_forecast_model);
            let client = Arc::new(client);
            (Some(client.clone()), Some(client))
        }
        None => {
            warn!("External estimator not configured (LLM_API_KEY unset); statistical forecasts only");
            (None, None)
        }
    };

    let simulation_mode = cfg!(feature = "simulation")
        || env::var("SIMULATION_MODE")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(false);
    if simulation_mode {
        warn!("🧪 SIMULATION MODE: orders are received instantly");
    }

    let driver = Arc::new(PipelineDriver::new(
        store.clone(),
        memory.clone(),
        estimator,
        dialogue_port,
        &config,
        simulation_mode,
    ));

    let scheduler = Arc::new(AgentScheduler::new(
        driver,
        jobs.clone(),
        config.scheduler_interval_minutes,
        config.manual_cycle_workers,
    ));
    scheduler.clone().start_interval();

    let app_state = AppState {
        store,
        memory,
        jobs,
        scheduler,
        simulation_mode,
    };

    let public_routes = Router::new()
        .route("/health", get(routes::health))
        .route("/token", post(auth_api::token))
        .with_state(auth_state);

    let protected_routes = Router::new()
        .route("/agent/run_once", post(agent_api::run_once))
        .route("/agent/job/:id", get(agent_api::get_job))
        .route("/agent/jobs", get(agent_api::list_jobs))
        .route("/agent/stream/:id", get(agent_api::stream_job))
        .route("/agent/finance-summary", get(agent_api::finance_summary))
        .route("/inventory", get(routes::get_inventory).post(routes::post_inventory))
        .route("/sales", get(routes::get_sales).post(routes::post_sales))
        .route("/orders", get(routes::get_orders).post(routes::post_orders))
        .route("/alerts", get(routes::get_alerts).post(routes::post_alerts))
        .route("/persistence/checkpoints", get(persistence_api::get_checkpoints))
        .route("/persistence/episodes", get(persistence_api::get_episodes))
        .route(
            "/persistence/facts",
            get(persistence_api::get_facts).post(persistence_api::post_facts),
        )
        .route(
            "/persistence/recovery/initiate",
            post(persistence_api::initiate_recovery),
        )
        .route("/simulate/sales", post(simulation::post_simulate_sales))
        .route("/me", get(auth_api::me))
        .route_layer(axum_mw::from_fn_with_state(
            jwt_handler.clone(),
            auth_middleware,
        ))
        .with_state(app_state);

    let app = public_routes
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("🌐 Listening on {addr}");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,stockpilot_backend=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
