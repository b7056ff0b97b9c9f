use anyhow::Context;
use ftba_runner::{SystemConfig, TradingSystem};
use std::time::Duration;

fn print_help() {
    eprintln!(
        r#"FTBA - Multi-agent trading system

USAGE:
    ftba [OPTIONS]

OPTIONS:
    --config <PATH>     Load configuration from JSON file
    --duration <SECS>   Stop after SECS seconds instead of waiting for Ctrl-C
    --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG            Log level filter (overrides system.log_level)

EXAMPLES:
    # Run one agent of every kind on the default simulated market
    ftba

    # Run with config file for one minute
    ftba --config ftba.json --duration 60
"#
    );
}

struct Args {
    config_path: Option<String>,
    duration: Option<Duration>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args {
        config_path: None,
        duration: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--config" | "-c" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
                parsed.config_path = Some(args[i].clone());
            }
            "--duration" | "-d" => {
                i += 1;
                let duration = args
                    .get(i)
                    .and_then(|s| s.parse::<f64>().ok())
                    .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
                match duration {
                    Some(duration) if !duration.is_zero() => {
                        parsed.duration = Some(duration);
                    }
                    _ => {
                        eprintln!("Error: --duration requires a positive number of seconds");
                        std::process::exit(1);
                    }
                }
            }
            arg => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
        }
        i += 1;
    }
    parsed
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = parse_args();

    let config = match &args.config_path {
        Some(path) => SystemConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => SystemConfig::default(),
    };

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log_filter().to_string()),
    )
    .init();

    match &args.config_path {
        Some(path) => log::info!("Loaded configuration from: {}", path),
        None => log::info!("Using default configuration"),
    }
    log::info!("Symbols: {}", config.market.symbols.join(", "));

    let mut system = TradingSystem::build(config)?;
    let startup = system.start().await;
    if startup.started.is_empty() {
        anyhow::bail!("no agent started ({} failed)", startup.failed.len());
    }

    let shutdown = async move {
        match args.duration {
            Some(duration) => {
                log::info!("Running for {:?}", duration);
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            None => {
                log::info!("Running until Ctrl-C");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    log::error!("Failed to listen for Ctrl-C: {}", e);
                }
            }
        }
    };

    let report = system.run_until(shutdown).await;
    if !report.is_clean() {
        log::warn!("Abandoned agents: {}", report.abandoned.join(", "));
    }
    log::info!("{}", serde_json::to_string(&report)?);
    Ok(())
}
