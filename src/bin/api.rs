use bas_assistant::{
    api::{start_server, AppState},
    config::AppConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let config = AppConfig::from_env()?;
    if config.gemini_api_key.is_none() {
        eprintln!("⚠️  GEMINI_API_KEY not set in .env");
        eprintln!("📌 Running with heuristic extraction and template explanations");
    }

    info!("🚀 BAS Assistant - API Server");
    info!("📍 Port: {}", config.port);

    let state = AppState::from_config(&config);

    info!("✅ Pipeline initialized");
    info!("📡 Starting API server...");

    start_server(state, config.port).await?;

    Ok(())
}
