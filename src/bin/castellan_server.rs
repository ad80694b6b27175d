//!
//! castellan server binary
//! -----------------------
//! Command-line entry point for the identity provider's HTTP API. Configuration
//! comes from a JSON file, `CASTELLAN_*` environment variables and CLI flags.

use anyhow::{Context, Result};
use castellan::config::ServerConfig;
use std::env;

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();

    let args: Vec<String> = env::args().collect();

    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("castellan server\n\nUSAGE:\n  castellan_server [--config PATH] [--http-port N] [--bind ADDR] [--store PATH] [--secret S]\n\nOPTIONS:\n  --config PATH     JSON configuration file (env: CASTELLAN_CONFIG, default ./castellan.json if present)\n  --http-port N     HTTP API port (env: CASTELLAN_HTTP_PORT, default 50001)\n  --bind ADDR       Bind address (env: CASTELLAN_BIND, default 0.0.0.0)\n  --store PATH      Store snapshot file (env: CASTELLAN_STORE, default in-memory)\n  --secret S        Shared token secret, at least 16 bytes (env: CASTELLAN_SHARED_SECRET)\n");
        return Ok(());
    }

    let config = ServerConfig::load(&args).context("While loading configuration")?;
    println!("castellan starting: http={}:{}", config.bind_address, config.http_port);
    castellan::server::run(config).await
}
