use colabri_presence::config::Config;
use colabri_presence::routes::create_app;
use colabri_presence::AppState;
use std::panic;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Load configuration first, the log level comes from it
    let loaded = Config::load();
    let config = loaded.as_ref().cloned().unwrap_or_default();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_filter().into()))
        .init();

    match &loaded {
        Ok(_) => info!("✅ Configuration loaded successfully"),
        Err(e) => {
            error!("❌ Failed to load configuration: {}", e);
            warn!("Using default configuration");
        }
    }
    info!("Starting presence relay {} ({})...", config.cloud_service_name, config.environment);
    if config.cloud_auth_jwt_secret.is_none() {
        warn!("No JWT secret configured - every connection is anonymous");
    }

    let state = Arc::new(AppState::new(&config));
    let app = create_app(state, &config);

    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 Awareness WebSocket available at ws://{}/ws/{{doc_id}}", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    axum::serve(listener, app)
        .await
        .expect("Server failed to start");
}
