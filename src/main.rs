use std::path::PathBuf;

use driftkv::{commands::Command, Engine, EngineConfig, Error, Result};
use tokio::{signal, sync::watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
usage: driftkv [--data-dir DIR] [--debug] <command>

commands:
    get KEY                  print the record stored under KEY
    set KEY VALUE [TTL_MS]   store VALUE, optionally expiring after TTL_MS
    del KEY                  delete KEY
    exists KEY               print whether KEY is present
    all                      print every record
    filter PATTERN           print records whose value matches ($ = any text)
    flush                    delete every record
    compact                  rewrite the log keeping only live records
    serve                    keep the engine open with its sweeper until Ctrl+C

environment:
    DRIFTKV_DATA_DIR, DRIFTKV_MAX_RECORD_SIZE, DRIFTKV_SWEEP_INTERVAL_MS,
    DRIFTKV_SYNC_WRITES, DRIFTKV_DEBUG, RUST_LOG";

struct Options {
    data_dir: Option<PathBuf>,
    debug: bool,
    command: Vec<String>,
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Options> {
    let mut options = Options {
        data_dir: None,
        debug: std::env::var("DRIFTKV_DEBUG").is_ok_and(|v| v == "true"),
        command: Vec::new(),
    };

    let mut args = args.peekable();
    while let Some(arg) = args.peek() {
        match arg.as_str() {
            "--data-dir" | "-d" => {
                args.next();
                let dir = args
                    .next()
                    .ok_or_else(|| Error::Command("--data-dir requires a value".into()))?;
                options.data_dir = Some(PathBuf::from(dir));
            }
            "--debug" => {
                args.next();
                options.debug = true;
            }
            _ => break,
        }
    }
    options.command = args.collect();

    Ok(options)
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let options = parse_args(std::env::args().skip(1))?;
    if options.command.is_empty() || options.command[0] == "--help" {
        println!("{}", USAGE);
        return Ok(());
    }

    init_tracing(options.debug);

    let mut config = EngineConfig::from_env()?;
    if let Some(dir) = options.data_dir {
        config.data_dir = dir;
    }
    let command = Command::from_args(options.command)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = Engine::open_with_shutdown(config, shutdown_rx).await?;

    let outcome = match command {
        Command::Serve => {
            info!(records = engine.len().await, "engine ready, press Ctrl+C to stop");
            signal::ctrl_c().await?;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
            Ok(())
        }
        command => command.execute(&engine).await.map(|lines| {
            for line in lines {
                println!("{}", line);
            }
        }),
    };

    if let Err(e) = &outcome {
        error!("{}", e);
    }
    engine.close().await?;
    outcome
}
