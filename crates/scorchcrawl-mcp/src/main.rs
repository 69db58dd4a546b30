use anyhow::Result;
use clap::{Parser, Subcommand};
use scorchcrawl_core::config::ServerConfig;

mod envelope;
mod params;
mod runtime;
mod server;

#[derive(Parser, Debug)]
#[command(name = "scorchcrawl")]
#[command(about = "ScorchCrawl MCP bridge: web scraping + agent research tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as an MCP stdio server (for IDEs / MCP clients).
    McpStdio,
    /// Run as an MCP server over streamable HTTP.
    McpHttp {
        /// Host to bind the HTTP endpoint to (default: SCORCHCRAWL_HOST or 127.0.0.1).
        #[arg(long)]
        host: Option<String>,
        /// Port to serve the MCP endpoint on (default: SCORCHCRAWL_PORT or 3000).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Diagnose configuration (json; no secrets).
    Doctor,
    /// Print version info (json).
    Version,
}

fn doctor_json(config: &ServerConfig) -> serde_json::Value {
    let t0 = std::time::Instant::now();
    serde_json::json!({
        "schema_version": 1,
        "name": "scorchcrawl",
        "version": env!("CARGO_PKG_VERSION"),
        "elapsed_ms": t0.elapsed().as_millis(),
        "modes": {
            "local_proxy": config.local_proxy,
            "cloud_service": config.cloud_service,
            "safe_mode": config.safe_mode,
        },
        "configured": {
            "engine_url": config.engine_url,
            "engine_api_key": config.engine_api_key.is_some(),
            "copilot_token": config.copilot_token.is_some(),
            "runtime_url": config.runtime_url.is_some(),
            "byok": config.byok.is_some(),
        },
        "agent": {
            "allowed_models": config.allowed_models,
            "default_model": config.default_model,
        },
        "rate_limits": config.rate_limits,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::McpStdio => {
            let config = ServerConfig::from_env();
            tracing::info!(
                engine_url = %config.engine_url,
                local_proxy = config.local_proxy,
                safe_mode = config.safe_mode,
                "starting MCP server over stdio"
            );
            server::serve_stdio(config)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }
        Commands::McpHttp { host, port } => {
            let config = ServerConfig::from_env();
            let host = host
                .or_else(|| std::env::var("SCORCHCRAWL_HOST").ok())
                .filter(|h| !h.trim().is_empty())
                .unwrap_or_else(|| "127.0.0.1".to_string());
            let port = port
                .or_else(|| {
                    std::env::var("SCORCHCRAWL_PORT")
                        .ok()
                        .and_then(|p| p.trim().parse().ok())
                })
                .unwrap_or(3000);
            server::serve_http(config, &host, port).await?;
        }
        Commands::Doctor => {
            let config = ServerConfig::from_env();
            println!("{}", serde_json::to_string_pretty(&doctor_json(&config))?);
        }
        Commands::Version => {
            println!(
                "{}",
                serde_json::json!({
                    "schema_version": 1,
                    "name": "scorchcrawl",
                    "version": env!("CARGO_PKG_VERSION"),
                })
            );
        }
    }
    Ok(())
}
