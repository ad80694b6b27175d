//!
//! castellan token verifier
//! ------------------------
//! Resource-server side check of capability tokens without contacting the issuer.
//! Prints `ACCEPTED <principal> <entity>` or `REJECTED` per token; the rejection
//! reason goes to the log only.
//!
//! Secret, grace period and origin hostnames come from the same configuration
//! layers as the server (`--config`, `CASTELLAN_*`); flags given here win.

use std::io::BufRead;

use anyhow::{Context, Result, bail};
use castellan::config::ServerConfig;

#[derive(Default)]
struct Options {
    grace: Option<i64>,
    origins: Vec<String>,
    tokens: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut opts = Options::default();
    let mut it = args.iter().skip(1);
    while let Some(a) = it.next() {
        match a.as_str() {
            // Consumed by ServerConfig::load.
            "--secret" | "--config" => {
                it.next().with_context(|| format!("{a} needs a value"))?;
            }
            "--grace" => opts.grace = Some(it.next().context("--grace needs a value")?.parse::<i64>().context("--grace must be an integer")?),
            "--origin" => opts.origins.push(it.next().context("--origin needs a value")?.clone()),
            flag if flag.starts_with("--") => bail!("unknown flag {flag}"),
            token => opts.tokens.push(token.to_string()),
        }
    }
    Ok(opts)
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .try_init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("castellan_verify [--config FILE] [--secret S] [--grace SECS] [--origin HOST]... [TOKEN...]\n\nReads tokens from stdin, one per line, when none are given.\nUnset values fall back to the server configuration and CASTELLAN_* variables.");
        return Ok(());
    }
    let mut opts = parse_args(&args)?;
    let config = ServerConfig::load(&args).context("While loading configuration")?;
    let mut settings = config.token_settings()?;
    if let Some(grace) = opts.grace {
        settings.grace_secs = grace;
    }
    settings.origins.extend(opts.origins.drain(..));
    let validator = settings
        .validator()
        .context("no shared secret given (--secret, CASTELLAN_SHARED_SECRET or shared_secret in the config file)")?;

    if opts.tokens.is_empty() {
        for line in std::io::stdin().lock().lines() {
            let line = line.context("While reading tokens from stdin")?;
            if !line.trim().is_empty() {
                opts.tokens.push(line.trim().to_string());
            }
        }
    }

    let mut rejected = 0usize;
    for token in &opts.tokens {
        match validator.validate(token) {
            Ok(v) => println!("ACCEPTED {} {}", v.principal, v.entity),
            Err(_) => {
                rejected += 1;
                println!("REJECTED");
            }
        }
    }
    if rejected > 0 {
        std::process::exit(1);
    }
    Ok(())
}
