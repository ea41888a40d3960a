use invoice_analysis_service::{ServiceConfig, create_app};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured tracing based on environment variables
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "invoice_analysis_service=debug,tower_http=debug".into());

    match log_format.as_str() {
        "pretty" => {
            // Human-readable logging for development
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            // Structured JSON logging for production
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match ServiceConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            std::process::exit(1);
        }
    };
    let port = config.port;

    let app = match create_app(config).await {
        Ok(app) => app,
        Err(e) => {
            error!("Failed to start service: {e}");
            std::process::exit(1);
        }
    };

    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await.unwrap();

    info!("Invoice analysis service running on http://0.0.0.0:{port}");
    info!("Analysis endpoint: POST http://0.0.0.0:{port}/analyze-invoices/");
    info!("Chatbot endpoint: POST http://0.0.0.0:{port}/chatbot/");

    axum::serve(listener, app).await.unwrap();
}
