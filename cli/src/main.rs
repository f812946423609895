//! chainingest CLI: run ingestion and inspect stream progress.
//!
//! Usage:
//! ```bash
//! chainingest run    --config ingest.yaml
//! chainingest run    --config ingest.yaml --from 29837200 --to 29900000
//! chainingest status --config ingest.yaml
//! chainingest info
//! ```
//!
//! Exit codes: `0` complete run, `2` run finished with failed or skipped
//! chunks, `1` fatal error.

mod config;
mod tracing_setup;

use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;

use chainingest_core::health;
use chainingest_evm::{IngestBuilder, RunRequest};

use crate::config::AppConfig;
use crate::tracing_setup::init_tracing;

const EXIT_PARTIAL: i32 = 2;

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "run" => cmd_run(&args[2..]).await,
        "status" => cmd_status(&args[2..]).await,
        "info" => {
            cmd_info();
            Ok(0)
        }
        "version" | "--version" | "-V" => {
            println!("chainingest {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(0)
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            Ok(1)
        }
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    }
}

fn print_usage() {
    println!("chainingest {}", env!("CARGO_PKG_VERSION"));
    println!("Resumable, rate-limited EVM event ingestion\n");
    println!("USAGE:");
    println!("    chainingest <COMMAND> [OPTIONS]\n");
    println!("COMMANDS:");
    println!("    run      Ingest from the checkpoint up to the confirmed head");
    println!("    status   Show checkpoint and lag for every stream");
    println!("    info     Show defaults and available backends");
    println!("    version  Print version");
    println!("    help     Print this help\n");
    println!("OPTIONS:");
    println!("    --config <PATH>   Config file (default: chainingest.yaml)");
    println!("    --from <BLOCK>    run: first block (default: checkpoint + 1)");
    println!("    --to <BLOCK>      run: last block (default: head - confirmation_lag)");
}

fn cmd_info() {
    println!("ChainIngest v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default confirmation lag: 12 blocks");
    println!("  Default block window: 1000 blocks (capped by provider)");
    println!("  Default concurrency: 4 chunks");
    println!("  Default rate limit: 10 req/s, burst 20");
    println!("  Default write batch: 500 events");
    let mut backends = vec!["memory"];
    if cfg!(feature = "sqlite") {
        backends.push("sqlite");
    }
    if cfg!(feature = "postgres") {
        backends.push("postgres");
    }
    println!("  Storage backends: {}", backends.join(", "));
}

/// Parsed command-line options shared by `run` and `status`.
#[derive(Debug, Default, PartialEq)]
struct Options {
    config: Option<PathBuf>,
    from: Option<u64>,
    to: Option<u64>,
}

impl Options {
    fn parse(args: &[String]) -> Result<Self> {
        let mut opts = Options::default();
        let mut iter = args.iter();
        while let Some(flag) = iter.next() {
            let mut value = || {
                iter.next()
                    .with_context(|| format!("{flag} needs a value"))
            };
            match flag.as_str() {
                "--config" | "-c" => opts.config = Some(PathBuf::from(value()?)),
                "--from" => opts.from = Some(parse_block(value()?)?),
                "--to" => opts.to = Some(parse_block(value()?)?),
                other => bail!("unknown option {other}"),
            }
        }
        if let (Some(from), Some(to)) = (opts.from, opts.to) {
            if from > to {
                bail!("--from {from} is after --to {to}");
            }
        }
        Ok(opts)
    }

    fn load_config(&self) -> Result<AppConfig> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from("chainingest.yaml"));
        let config = AppConfig::load(&path)?;
        init_tracing(&config.log)?;
        Ok(config)
    }
}

fn parse_block(s: &str) -> Result<u64> {
    s.replace('_', "")
        .parse()
        .with_context(|| format!("invalid block number '{s}'"))
}

async fn cmd_run(args: &[String]) -> Result<i32> {
    let opts = Options::parse(args)?;
    let config = opts.load_config()?;
    let stores = config.open_storage().await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing in-flight chunks");
            on_signal.cancel();
        }
    });

    let orchestrator = IngestBuilder::from_config(config.ingest.clone())
        .provider(config.log_provider()?)
        .schemas(config.schema_set()?)
        .pools(config.pool_registry())
        .checkpoints(stores.checkpoints)
        .events(stores.events)
        .cancel_token(cancel)
        .build()?;

    let request = RunRequest {
        from: opts.from,
        to: opts.to,
    };
    let summary = orchestrator.run(request).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(if summary.is_complete() { 0 } else { EXIT_PARTIAL })
}

async fn cmd_status(args: &[String]) -> Result<i32> {
    let opts = Options::parse(args)?;
    let config = opts.load_config()?;
    let stores = config.open_storage().await?;
    let provider = config.log_provider()?;

    let head = provider
        .get_latest_block_number()
        .await
        .with_context(|| format!("reading chain head from {}", provider.name()))?;
    let streams = health::observe_all(stores.checkpoints.as_ref(), head).await?;

    if streams.is_empty() {
        println!("no checkpoints yet (chain head {head})");
        return Ok(0);
    }
    println!("{}", serde_json::to_string_pretty(&streams)?);
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn parses_run_options() {
        let opts = Options::parse(&args("--config x.yaml --from 1_000 --to 2000")).unwrap();
        assert_eq!(
            opts,
            Options {
                config: Some(PathBuf::from("x.yaml")),
                from: Some(1000),
                to: Some(2000),
            }
        );
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(Options::parse(&args("--from 10 --to 5")).is_err());
    }

    #[test]
    fn rejects_missing_value_and_unknown_flag() {
        assert!(Options::parse(&args("--from")).is_err());
        assert!(Options::parse(&args("--verbose")).is_err());
    }
}
