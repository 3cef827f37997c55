//! Janus server entry point
//!
//! Serves the dispatcher over line-delimited JSON-RPC on stdin/stdout. The
//! transport is deliberately thin; everything interesting lives in
//! `janus_core`.

use clap::Parser;
use janus_core::{
    Dispatcher, FsStore, JsonRpcError, JsonRpcResponse, ResourceProvider, ServerSettings,
    StaticToolRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "janus", version, about = "Consent-gated tool and resource server")]
struct Cli {
    /// Path to a TOML settings file
    #[arg(short, long, env = "JANUS_CONFIG")]
    config: Option<PathBuf>,

    /// Directory served as the `file` resource provider
    #[arg(short, long, env = "JANUS_ROOT", default_value = ".")]
    root: PathBuf,

    /// Log filter (overrides RUST_LOG)
    #[arg(long, default_value = "janus=info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = ServerSettings::load(cli.config.as_deref())?;
    let caching = settings.capability_set()?.enabled("resource_caching");

    let store = Arc::new(FsStore::new(&cli.root));
    let provider = Arc::new(ResourceProvider::new("file", store, &settings, caching)?);
    let registry = Arc::new(StaticToolRegistry::new());
    let dispatcher = Dispatcher::new(&settings, registry, vec![provider])?;

    info!(
        "janus listening on stdin (root: {})",
        cli.root.display()
    );
    serve(dispatcher).await
}

/// Read requests line by line and write one response line per request.
///
/// The local stdio caller is trusted; no caller context is attached, so the
/// gate is not consulted. Networked transports construct a `CallerContext`
/// per connection instead.
async fn serve(dispatcher: Dispatcher) -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut stdout = tokio::io::stdout();
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("received EOF, shutting down");
                break;
            }
            Ok(_) => {
                let raw = line.trim();
                if raw.is_empty() {
                    continue;
                }
                let reply = match serde_json::from_str::<serde_json::Value>(raw) {
                    Ok(request) => dispatcher
                        .dispatch(request, None)
                        .await
                        .map(|v| v.to_string()),
                    Err(e) => Some(
                        JsonRpcResponse::error(
                            None,
                            JsonRpcError::parse_error(format!("invalid JSON: {}", e)),
                        )
                        .into_wire(),
                    ),
                };
                if let Some(reply) = reply {
                    stdout.write_all(reply.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                    stdout.flush().await?;
                }
            }
            Err(e) => {
                error!("failed to read from stdin: {}", e);
                break;
            }
        }
    }

    info!("janus shutting down");
    Ok(())
}
