//! collapser-sim — drive a collapser with simulated concurrent callers
//!
//! Usage:
//!   collapser-sim [--config <file.yaml|file.json>] [--callers <n>] [--spread-ms <ms>] [--latency-ms <ms>]
//!
//! Without `--config` the collapser settings come from COLLAPSER_* environment
//! variables. Set RUST_LOG=debug to see windows open and seal.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use request_collapser::batch::batch_fn;
use request_collapser::{CollapserConfig, CollapserRegistry, Scope};
use tracing_subscriber::EnvFilter;

struct Options {
    config: Option<String>,
    callers: usize,
    spread_ms: u64,
    latency_ms: u64,
}

fn parse_args(args: &[String]) -> anyhow::Result<Options> {
    let mut opts = Options {
        config: None,
        callers: 20,
        spread_ms: 30,
        latency_ms: 5,
    };
    let mut i = 0;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--config", Some(v)) => opts.config = Some(v.clone()),
            ("--callers", Some(v)) => opts.callers = v.parse().context("--callers")?,
            ("--spread-ms", Some(v)) => opts.spread_ms = v.parse().context("--spread-ms")?,
            ("--latency-ms", Some(v)) => opts.latency_ms = v.parse().context("--latency-ms")?,
            ("--help" | "-h", _) => {
                print_usage();
                std::process::exit(0);
            }
            (other, _) => bail!("unknown or incomplete option: {}", other),
        }
        i += 2;
    }
    Ok(opts)
}

fn print_usage() {
    println!(
        r#"collapser-sim — request collapsing simulator

USAGE:
    collapser-sim [OPTIONS]

OPTIONS:
    --config <path>       Collapser config (.yaml, .yml or .json)
    --callers <n>         Number of simulated callers (default 20)
    --spread-ms <ms>      Callers start uniformly within this span (default 30)
    --latency-ms <ms>     Simulated batch call latency (default 5)

ENVIRONMENT:
    COLLAPSER_KEY, COLLAPSER_SCOPE, COLLAPSER_WINDOW_MS,
    COLLAPSER_MAX_BATCH_SIZE, COLLAPSER_FALLBACK_ENABLED
    RUST_LOG                  Log filter (e.g. debug)"#
    );
}

fn load_config(path: Option<&str>) -> anyhow::Result<CollapserConfig> {
    let mut config = match path {
        Some(p) => {
            let content =
                std::fs::read_to_string(p).with_context(|| format!("reading {}", p))?;
            let is_json = Path::new(p)
                .extension()
                .map(|ext| ext == "json")
                .unwrap_or(false);
            if is_json {
                CollapserConfig::from_json_str(&content)?
            } else {
                CollapserConfig::from_yaml_str(&content)?
            }
        }
        None => CollapserConfig::from_env()?,
    };
    if config.collapser_key.is_empty() {
        config.collapser_key = config.resolve_key("sim");
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let opts = parse_args(&args)?;
    let config = load_config(opts.config.as_deref())?;
    let key = config.collapser_key.clone();
    let latency = Duration::from_millis(opts.latency_ms);

    let registry = CollapserRegistry::new().with_command(
        key.clone(),
        Arc::new(batch_fn(move |args: Vec<usize>| async move {
            tokio::time::sleep(latency).await;
            Ok(args
                .into_iter()
                .map(|n| (n % 10 != 0).then(|| format!("echo-{}", n)))
                .collect::<Vec<_>>())
        })),
    );

    let context = registry.begin_context();
    let collapser = match config.scope {
        Scope::Global => registry.get_or_create(&config, None)?,
        Scope::Request => registry.get_or_create(&config, Some(&context))?,
    };

    println!(
        "collapser '{}' scope={:?} window={}ms max_batch_size={:?} callers={}",
        key, config.scope, config.window_duration_ms, config.max_batch_size, opts.callers
    );

    let step = if opts.callers > 0 {
        opts.spread_ms / opts.callers as u64
    } else {
        0
    };
    let tasks: Vec<_> = (0..opts.callers)
        .map(|n| {
            let c = collapser.clone();
            let delay = Duration::from_millis(step * n as u64);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                (n, c.execute(n).await)
            })
        })
        .collect();

    for task in tasks {
        let (n, outcome) = task.await?;
        match outcome {
            Ok(Some(v)) => println!("caller {:>3}: {}", n, v),
            Ok(None) => println!("caller {:>3}: <no value>", n),
            Err(e) => println!("caller {:>3}: error: {}", n, e),
        }
    }

    let snapshot = collapser.metrics();
    context.close().await?;
    registry.shutdown().await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}
