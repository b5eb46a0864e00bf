use axum::serve;
use std::sync::Arc;
use tbl_engine_rust::api::handlers::EngineState;
use tbl_engine_rust::api::routes::create_router;
use tbl_engine_rust::config::AppConfig;
use tbl_engine_rust::seed;
use tbl_engine_rust::store::traits::Store;
use tbl_engine_rust::store::{MemoryStore, PostgresStore};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging with explicit filter to suppress sqlx debug logs
    use env_logger::Builder;
    use log::LevelFilter;

    Builder::new()
        .filter_level(LevelFilter::Info) // Default to Info for everything
        .filter_module("sqlx", LevelFilter::Warn) // Suppress sqlx Debug logs
        .init();

    println!("TBL Engine: Dynamic Form Evaluation Server");

    // Load configuration
    let config = AppConfig::load()?;
    println!(
        "Configuration loaded: server={}:{}",
        config.server.host, config.server.port
    );

    match config.database_url() {
        Some(database_url) => {
            println!("Connecting to PostgreSQL...");
            let postgres_store = PostgresStore::new(&database_url).await?;

            println!("Bootstrapping database schema...");
            postgres_store.ensure_schema().await?;
            println!("Database ready");

            run_with_store(Arc::new(postgres_store), &config).await
        }
        None => {
            println!("No DATABASE_URL configured, using the in-memory store");
            run_with_store(Arc::new(MemoryStore::new()), &config).await
        }
    }
}

async fn run_with_store<S: Store + 'static>(
    store: Arc<S>,
    config: &AppConfig,
) -> anyhow::Result<()> {
    // Load seed data for demonstration (optional)
    if std::env::var("LOAD_SEED_DATA").unwrap_or_default() == "true" {
        println!("Loading seed data...");
        seed::load_seed_data(&*store).await?;
        println!("Seed data loaded successfully");
    }

    let app = create_router().with_state(EngineState::new(store));

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    println!("TBL engine running on http://{}", bind_address);

    serve(listener, app).await?;

    Ok(())
}
