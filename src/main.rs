#![forbid(unsafe_code)]

//! `command-bridge`: command server and agent relay binary.
//!
//! `serve` runs the application-side command server backed by the
//! in-memory scene executor. `relay` runs the agent-facing relay, over TCP
//! or stdio, forwarding tool calls to a command server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use command_bridge::config::RelayTransport;
use command_bridge::executor::SceneExecutor;
use command_bridge::relay::{transport, BridgeRelay, CommandBackend};
use command_bridge::server::CommandServer;
use command_bridge::supervisor::ConnectionSupervisor;
use command_bridge::{AppError, BridgeConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum TransportArg {
    Tcp,
    Stdio,
}

impl From<TransportArg> for RelayTransport {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Tcp => Self::Tcp,
            TransportArg::Stdio => Self::Stdio,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "command-bridge", about = "JSON command bridge server and relay", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file; built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json). Logs always go to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Run the command server with the in-memory scene executor.
    Serve {
        /// Override `server.host`.
        #[arg(long)]
        host: Option<String>,
        /// Override `server.port`.
        #[arg(long)]
        port: Option<u16>,
        /// Allow privileged commands such as `reset_scene`.
        #[arg(long)]
        allow_privileged: bool,
    },

    /// Run the agent relay in front of a command server.
    Relay {
        /// Override `relay.transport`.
        #[arg(long, value_enum)]
        transport: Option<TransportArg>,
        /// Override `relay.host`.
        #[arg(long)]
        host: Option<String>,
        /// Override `relay.port`.
        #[arg(long)]
        port: Option<u16>,
        /// Override `client.host`.
        #[arg(long)]
        server_host: Option<String>,
        /// Override `client.port`.
        #[arg(long)]
        server_port: Option<u16>,
    },
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let result = runtime.block_on(run(args));
    // A blocked stdin read would otherwise keep the process alive.
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}

async fn run(args: Cli) -> Result<()> {
    let mut config = match args.config {
        Some(ref path) => BridgeConfig::load_from_path(path)?,
        None => BridgeConfig::default(),
    };

    match args.mode {
        Mode::Serve {
            host,
            port,
            allow_privileged,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.server.allow_privileged |= allow_privileged;
            config.validate()?;
            serve(config).await
        }
        Mode::Relay {
            transport,
            host,
            port,
            server_host,
            server_port,
        } => {
            if let Some(transport) = transport {
                config.relay.transport = transport.into();
            }
            if let Some(host) = host {
                config.relay.host = host;
            }
            if let Some(port) = port {
                config.relay.port = port;
            }
            if let Some(host) = server_host {
                config.client.host = host;
            }
            if let Some(port) = server_port {
                config.client.port = port;
            }
            config.validate()?;
            relay(config).await
        }
    }
}

async fn serve(config: BridgeConfig) -> Result<()> {
    let executor = Arc::new(SceneExecutor::with_privileged(config.server.allow_privileged));
    let server = CommandServer::bind(&config.server, executor).await?;
    info!(addr = %server.local_addr()?, allow_privileged = config.server.allow_privileged, "command server ready");

    let ct = CancellationToken::new();
    let handle = server.spawn(ct.clone());

    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    if let Err(err) = handle.await {
        error!(%err, "command server task failed");
    }
    info!("command-bridge server shut down");
    Ok(())
}

async fn relay(config: BridgeConfig) -> Result<()> {
    let supervisor = Arc::new(ConnectionSupervisor::new(config.client.clone()));
    let backend = Arc::clone(&supervisor) as Arc<dyn CommandBackend>;

    let ct = CancellationToken::new();
    let relay = Arc::new(BridgeRelay::new(backend, config.relay.clone(), ct.clone()));

    let signal_ct = ct.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_ct.cancel();
    });

    info!(
        transport = ?config.relay.transport,
        server = %config.client.address(),
        "relay ready"
    );

    match config.relay.transport {
        RelayTransport::Tcp => {
            let listener = transport::bind_tcp(&config.relay).await?;
            transport::serve_tcp(relay, listener, ct.clone()).await;
        }
        RelayTransport::Stdio => {
            if let Err(err) = transport::serve_stdio(relay, ct.clone()).await {
                error!(%err, "stdio transport failed");
            }
        }
    }

    ct.cancel();
    supervisor.shutdown().await;
    info!("command-bridge relay shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
