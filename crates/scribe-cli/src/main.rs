use std::env;
use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

mod app;
mod commands;
mod config;
mod notifier;
mod view;

#[derive(Debug, Default, PartialEq, Eq)]
struct RunArgs {
    url: Option<String>,
    config: Option<PathBuf>,
}

#[derive(Debug, PartialEq, Eq)]
enum Invocation {
    Run(RunArgs),
    Help,
    Version,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = match parse_args(env::args().skip(1).collect())? {
        Invocation::Help => {
            print_help();
            return Ok(());
        }
        Invocation::Version => {
            println!("scribe {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Invocation::Run(args) => args,
    };

    init_logging();
    let mut config = config::load_config(args.config.as_deref())?;
    if let Some(url) = args.url {
        config.server.url = url;
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(app::run(config))
}

fn parse_args(args: Vec<String>) -> Result<Invocation, Box<dyn std::error::Error>> {
    let mut run = RunArgs::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" | "help" => return Ok(Invocation::Help),
            "--version" | "-V" | "version" => return Ok(Invocation::Version),
            "--url" => {
                let Some(value) = args.get(i + 1) else {
                    return Err("--url requires a ws:// or wss:// address".into());
                };
                run.url = Some(value.clone());
                i += 2;
            }
            "--config" => {
                let Some(value) = args.get(i + 1) else {
                    return Err("--config requires a path".into());
                };
                run.config = Some(PathBuf::from(value));
                i += 2;
            }
            other => {
                return Err(format!("unsupported argument: {other}").into());
            }
        }
    }
    Ok(Invocation::Run(run))
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("SCRIBE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_help() {
    println!("scribe {}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  scribe [--url URL] [--config PATH]");
    println!("  scribe --help");
    println!("  scribe --version");
    println!();
    println!("Environment:");
    println!("  SCRIBE_LOG    log filter (default: warn)");
}
