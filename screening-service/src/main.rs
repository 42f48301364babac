use screening_service::{LogFormat, ServiceConfig, create_app};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing; JSON unless LOG_FORMAT=pretty
fn init_tracing(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "screening_service=debug,screening_flow=debug,tower_http=debug".into()
    });

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        LogFormat::Json => {
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
async fn main() -> anyhow::Result<()> {
    // Subscriber first so config warnings are not lost
    init_tracing(LogFormat::from_env());
    let config = ServiceConfig::from_env();

    let app = create_app(&config)?;
    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    let addr = listener.local_addr()?;

    info!("Screening Service starting on {}", addr);
    info!("Prediction backend: {}", config.prediction_api_url);
    info!("Health check endpoint: http://{}/health", addr);
    info!("Start a session: POST http://{}/screening/sessions", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
