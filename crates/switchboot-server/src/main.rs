use std::sync::Arc;

use axum::http::HeaderValue;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use switchboot_core::serial::SerialTransportFactory;
use switchboot_server::api::{create_api_routes, require_passcode, AppState};
use switchboot_server::config::AppConfig;
use switchboot_server::logging;
use switchboot_server::scheduler::RunScheduler;
use switchboot_server::storage::{Repository, SqliteRepository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Failed to load config: {}. Using defaults.", e);
        AppConfig::default()
    });

    let _log_guard = match logging::init_logging(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    info!("Starting switchboot controller");

    let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::new(&config.database_url).await?);
    info!("Storage initialized");

    let transports = Arc::new(SerialTransportFactory::new(
        config.serial_port_base_path.clone(),
        config.serial_baudrate,
        config.read_timeout(),
    ));
    let scheduler = RunScheduler::new(Arc::clone(&repo), transports);

    let state = AppState {
        repo,
        scheduler,
        config: Arc::new(config.clone()),
    };

    let cors = if config.cors_origins.iter().any(|origin| origin == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let app = create_api_routes()
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_passcode,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state);

    let bind_addr = config.bind_address();
    info!("Listening on {}", bind_addr);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
