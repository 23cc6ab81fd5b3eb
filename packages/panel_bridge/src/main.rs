use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use clap::{Parser, Subcommand};
use socket_forwarding::{Scheduler, TokioScheduler, Transport, WebSocketTransport};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast};
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod config;
mod handlers;
mod panel;
mod progress;
mod protocol;
mod workspace;


use crate::config::{BridgeConfig, FileConfig, ForwardingConfig, ServerConfig, SessionConfig};
use crate::protocol::UiOutbound;
use crate::workspace::Workspace;

/// Selection notices buffered per panel before it starts lagging
const NOTICE_CAPACITY: usize = 64;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "bridge")]
#[command(about = "Host process for the side panel: socket forwarding and streamed code insertion")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.panel-bridge)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge server in the foreground
    Serve(ServeArgs),

    /// Print the resolved configuration as TOML
    Config,
}

#[derive(Parser)]
struct ServeArgs {
    /// Port for the web server (0 = auto-select)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Session id reported to the panel (generated if not set)
    #[arg(long)]
    session_id: Option<String>,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub session: Arc<SessionConfig>,
    pub forwarding: Arc<ForwardingConfig>,
    pub workspace: Arc<Mutex<Workspace>>,
    /// Selection changes fanned out to every connected panel
    pub notices: broadcast::Sender<UiOutbound>,
    pub transport: Arc<dyn Transport>,
    pub scheduler: Arc<dyn Scheduler>,
}

impl AppState {
    fn new(
        session: SessionConfig,
        forwarding: ForwardingConfig,
        transport: Arc<dyn Transport>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let workspace = Workspace::new(session.workspace_path.clone());
        Self {
            session: Arc::new(session),
            forwarding: Arc::new(forwarding),
            workspace: Arc::new(Mutex::new(workspace)),
            notices,
            transport,
            scheduler,
        }
    }
}

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/api/panel/ws", get(handlers::panel_ws_handler))
        .route("/api/stream", post(handlers::push_stream_handler))
        .route("/api/stream/close", post(handlers::close_stream_handler))
        .route("/api/selection", post(handlers::set_selection_handler))
        .route("/api/document", get(handlers::get_document_handler))
        .route("/api/document/open", post(handlers::open_document_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = BridgeConfig::new(cli.data_dir.clone())?;

    match cli.command {
        Commands::Serve(args) => run_server(args, config).await,
        Commands::Config => print_config(&config),
    }
}

fn resolve_file_config(config: &BridgeConfig) -> Result<FileConfig> {
    config::load_config(&config.data_dir)
        .extract()
        .with_context(|| {
            format!(
                "Failed to load configuration from {}",
                config.config_toml_path().display()
            )
        })
}

fn print_config(config: &BridgeConfig) -> Result<()> {
    let file_config = resolve_file_config(config)?;
    let rendered =
        toml::to_string_pretty(&file_config).context("Failed to render configuration")?;
    println!("# data_dir = {}", config.data_dir.display());
    println!("# logs_dir = {}", config.logs_dir.display());
    println!("{}", rendered);
    Ok(())
}

async fn run_server(args: ServeArgs, config: BridgeConfig) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "bridge=debug,socket_forwarding=debug,fence_stream=debug,tower_http=debug,info"
    } else {
        "bridge=info,socket_forwarding=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    let log_path = config.log_file_path();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file: {:?}", log_path))?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(log_file)),
        )
        .with(env_filter)
        .init();

    info!("Logging to {}", log_path.display());

    info!("Starting panel bridge");

    // CLI flags win over config.toml and env
    let mut file_config = resolve_file_config(&config)?;
    if let Some(port) = args.port {
        file_config.server.port = port;
    }
    if let Some(host) = args.host {
        file_config.server.host = host;
    }
    if args.session_id.is_some() {
        file_config.session.session_id = args.session_id;
    }

    let server_config = ServerConfig::from_file(&file_config.server);
    let forwarding = ForwardingConfig::from_file(&file_config.forwarding);
    let session = SessionConfig::from_file(&file_config.session)?;
    info!(
        "Forwarding: reconnect every {}ms, liveness every {}ms, open timeout {}",
        forwarding.policy.reconnect_delay.as_millis(),
        forwarding.policy.liveness_interval.as_millis(),
        forwarding
            .open_timeout
            .map(|t| format!("{}ms", t.as_millis()))
            .unwrap_or_else(|| "none".to_string())
    );
    info!(
        "Workspace: {} (session {})",
        session.workspace_path.display(),
        session.session_id
    );

    let state = AppState::new(
        session,
        forwarding,
        Arc::new(WebSocketTransport::from_current()),
        Arc::new(TokioScheduler::from_current()),
    );
    let app = build_router(state);

    let addr = server_config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;
    info!("Panel bridge listening on http://{}", actual_addr);

    let shutdown_signal = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    use socket_forwarding::ManualScheduler;
    use socket_forwarding::testing::MockTransport;

    AppState::new(
        SessionConfig {
            api_url: "http://api.test".to_string(),
            machine_id: "machine-1".to_string(),
            session_id: "session-1".to_string(),
            workspace_path: PathBuf::from("/work"),
        },
        ForwardingConfig::from_file(&config::ForwardingFileConfig::default()),
        Arc::new(MockTransport::new()),
        Arc::new(ManualScheduler::new()),
    )
}
