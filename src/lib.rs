pub mod api;
pub mod config;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

// Export logic types
pub use logic::{
    BatchEvaluation, CapacityEvaluator, CapacityOutcome, EvalStats, MaterializeError, Materializer,
    OperationInterpreter, PreviewEvaluator, StagingError, StagingOps, StoredOperationInterpreter,
};

// Export all model types
pub use model::*;

// Export seed module
pub use seed::*;

// Export store types
pub use store::{MemoryStore, PostgresStore, StagingStore, Store};

// Function for integration testing
pub async fn run_server() -> anyhow::Result<()> {
    use axum::serve;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging with INFO level only (suppress DEBUG logs)
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    // Load configuration
    let config = crate::config::AppConfig::load()?;

    let database_url = config
        .database_url()
        .ok_or_else(|| anyhow::anyhow!("DATABASE_URL is required"))?;
    let postgres_store = crate::store::PostgresStore::new(&database_url).await?;
    postgres_store.ensure_schema().await?;

    let state = crate::api::handlers::EngineState::new(Arc::new(postgres_store));

    // Create router with state
    let app = crate::api::routes::create_router().with_state(state);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;

    serve(listener, app).await?;

    Ok(())
}
