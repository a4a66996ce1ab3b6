//! toolhub - run tools on a remote client from a central orchestrator
//!
//! ## Modes
//!
//! **`toolhub serve`**: Starts the hub. Dispatchers connect over WebSocket at
//! `/toolhub`; tools are invoked with `POST /sessions/{session}/tools/{name}`.
//!
//! **`toolhub client`**: Joins a session on a hub and executes incoming tool
//! calls with the built-in capabilities until interrupted.
//!
//! **`toolhub call`**: Invokes one tool through a running hub and prints the
//! result.

use clap::{Parser as ClapParser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use toolhub::{
    api,
    config::{self, ToolhubConfig},
    connection::DispatcherConnection,
    dispatcher::RemoteDispatcher,
    tools,
};

/// toolhub - run tools on a remote client from a central orchestrator
#[derive(ClapParser, Debug)]
#[command(name = "toolhub", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file
    #[arg(long, global = true, env = "TOOLHUB_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the hub and tool-call broker
    Serve {
        /// Address to bind the HTTP/WebSocket server
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Default deadline for a tool call, in seconds
        #[arg(long)]
        call_timeout_secs: Option<u64>,
    },

    /// Connect to a hub and execute tool calls for a session
    Client {
        /// WebSocket URL of the hub
        #[arg(long, env = "TOOLHUB_URL")]
        hub_url: Option<String>,

        /// Session to join
        #[arg(long, env = "TOOLHUB_SESSION")]
        session: Option<String>,

        /// Identifier reported to the hub (defaults to the hostname)
        #[arg(long)]
        kernel_id: Option<String>,

        /// Directory file-writing tools write into
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Invoke a tool on a session through a running hub
    Call {
        /// Session to call into
        session: String,

        /// Tool name
        name: String,

        /// Arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,

        /// Deadline in milliseconds (server default if omitted)
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Address of the hub's HTTP server
        #[arg(long, default_value = config::DEFAULT_BIND)]
        server: SocketAddr,
    },
}

#[derive(Error, Debug)]
pub enum ToolhubError {
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid arguments: {0}")]
    InvalidArgs(#[source] serde_json::Error),

    #[error("failed to encode output: {0}")]
    Output(#[source] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("tool call failed: {0}")]
    CallFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), ToolhubError> {
    let cli = Cli::parse();
    init_tracing();

    let file_config = ToolhubConfig::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { bind, call_timeout_secs } => {
            run_serve(&file_config, bind, call_timeout_secs).await
        }
        Commands::Client { hub_url, session, kernel_id, output_dir } => {
            run_client(&file_config, hub_url, session, kernel_id, output_dir).await
        }
        Commands::Call { session, name, args, timeout_ms, server } => {
            run_call(session, name, args, timeout_ms, server).await
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "toolhub=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run_serve(
    file_config: &ToolhubConfig,
    bind: Option<SocketAddr>,
    call_timeout_secs: Option<u64>,
) -> Result<(), ToolhubError> {
    let section = file_config.server();
    let bind = bind.or(section.bind).unwrap_or_else(config::default_bind);
    let call_timeout = call_timeout_secs
        .or(section.call_timeout_secs)
        .map(Duration::from_secs)
        .unwrap_or(api::DEFAULT_CALL_TIMEOUT);

    let state = api::AppState::new(call_timeout);
    let shutdown = state.shutdown.clone();
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    let local = listener.local_addr()?;
    tracing::info!(addr = %local, ?call_timeout, "toolhub listening");
    eprintln!("toolhub: Listening on {}", local);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
            shutdown.cancel();
        })
        .await?;
    Ok(())
}

async fn run_client(
    file_config: &ToolhubConfig,
    hub_url: Option<String>,
    session: Option<String>,
    kernel_id: Option<String>,
    output_dir: Option<PathBuf>,
) -> Result<(), ToolhubError> {
    let section = file_config.client();
    let hub_url = hub_url
        .or(section.hub_url)
        .unwrap_or_else(|| config::DEFAULT_HUB_URL.to_string());
    let session = session
        .or(section.session_id)
        .unwrap_or_else(|| config::DEFAULT_SESSION.to_string());
    let kernel_id = config::resolve_kernel_id(kernel_id.or(section.kernel_id).as_deref());
    let output_dir = output_dir
        .or(section.output_dir)
        .unwrap_or_else(tools::default_output_dir);

    let registry = tools::builtin_registry(output_dir);
    tracing::info!(
        session_id = %session,
        kernel_id = %kernel_id,
        capabilities = ?registry.names(),
        "starting dispatcher"
    );
    for (name, description) in registry.descriptions() {
        tracing::debug!(tool = %name, "{}", description);
    }

    let dispatcher = Arc::new(RemoteDispatcher::new(
        session,
        Some(kernel_id),
        Arc::new(registry),
    ));
    let connection = DispatcherConnection::spawn(hub_url, dispatcher);

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down dispatcher");
    connection.shutdown();
    connection.join().await;
    Ok(())
}

async fn run_call(
    session: String,
    name: String,
    args: String,
    timeout_ms: Option<u64>,
    server: SocketAddr,
) -> Result<(), ToolhubError> {
    let arguments: serde_json::Value =
        serde_json::from_str(&args).map_err(ToolhubError::InvalidArgs)?;

    let url = format!("http://{}/sessions/{}/tools/{}", server, session, name);
    let client = reqwest::Client::new();
    let mut req = client.post(&url).json(&arguments);
    if let Some(ms) = timeout_ms {
        req = req.query(&[("timeout_ms", ms)]);
    }

    let resp = req.send().await?;
    let status = resp.status();
    let body: serde_json::Value = resp.json().await?;
    if !status.is_success() {
        let message = body["error"]["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| status.to_string());
        return Err(ToolhubError::CallFailed(message));
    }

    let pretty = serde_json::to_string_pretty(&body).map_err(ToolhubError::Output)?;
    println!("{}", pretty);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_error() -> serde_json::Error {
        serde_json::from_str::<serde_json::Value>("{").unwrap_err()
    }

    #[test]
    fn argument_and_output_failures_are_labelled_apart() {
        assert!(ToolhubError::InvalidArgs(json_error())
            .to_string()
            .starts_with("invalid arguments"));
        assert!(ToolhubError::Output(json_error())
            .to_string()
            .starts_with("failed to encode output"));
    }

    #[tokio::test]
    async fn call_rejects_malformed_args_before_sending() {
        let err = run_call(
            "s1".into(),
            "echo".into(),
            "{not json".into(),
            None,
            config::default_bind(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ToolhubError::InvalidArgs(_)));
    }
}
