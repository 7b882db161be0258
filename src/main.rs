//! taskpilot - supervisor for an AI-driven browser-automation engine
//!
//! Accepts natural-language task requests from a browser extension over a
//! WebSocket event channel and supervises their execution.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use taskpilot::api::{create_router, AppState};
use taskpilot::llm::{build_service, LlmConfig};
use taskpilot::protocol::DEFAULT_PORT;
use taskpilot::stuck::StuckConfig;
use taskpilot::task::ManagerConfig;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "taskpilot",
    version,
    about = "Task-orchestration server for a browser-automation agent"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the WebSocket server.
    Web {
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskpilot=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Web { port } => serve(port).await,
    }
}

async fn serve(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let llm = build_service(&LlmConfig::from_env());
    if llm.is_none() {
        tracing::warn!(
            "No LLM API key configured. Set ANTHROPIC_API_KEY; the clarification dialog is disabled."
        );
    }

    let manager_config = ManagerConfig {
        stuck: StuckConfig::from_env(),
        default_cdp_endpoint: std::env::var("TASKPILOT_CDP_ENDPOINT").ok(),
        ..ManagerConfig::default()
    };
    if manager_config.default_cdp_endpoint.is_none() {
        tracing::warn!(
            "TASKPILOT_CDP_ENDPOINT is not set; start requests must carry their own endpoint"
        );
    }

    // The automation engine runs out of process and is wired in by the
    // embedding application; without one, task starts are rejected.
    tracing::warn!("No automation engine is linked into this binary; task starts will be rejected");
    let state = AppState::new(None, llm, manager_config);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("taskpilot listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutting down");
}
