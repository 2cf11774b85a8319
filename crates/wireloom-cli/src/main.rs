//! `wireloom`: loads a config, registers the built-in channel protocols, and
//! drives a [`wireloom_core::processor::Processor`] to completion.
//!
//! `wireloom run <config> [-D key=value]...` activates every root object and
//! blocks until shutdown (SIGINT/SIGTERM, or every object closing on its
//! own). `wireloom check <config>` only builds the dependency graph and
//! channel instances — it never calls `open()` — so CI can catch a bad URL
//! or a dependency cycle without touching the network or disk.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use wireloom_core::config::Config;
use wireloom_core::context::Context;
use wireloom_core::processor::Processor;

#[derive(Parser)]
#[command(name = "wireloom", about = "Run or validate a wireloom channel graph")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the processor and run it until shutdown.
    Run {
        /// Path to the YAML config.
        config: PathBuf,
        /// Override a dotted config key, e.g. `-D objects.a.url=tcp://...`.
        #[arg(short = 'D', value_name = "key=value")]
        overrides: Vec<String>,
    },
    /// Parse the config and build the object graph, but never open anything.
    Check {
        config: PathBuf,
        #[arg(short = 'D', value_name = "key=value")]
        overrides: Vec<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let code = match Cli::parse().command {
        Command::Run { config, overrides } => run(config, overrides),
        Command::Check { config, overrides } => check(config, overrides),
    };
    std::process::exit(code);
}

fn load_config(path: &PathBuf, overrides: &[String]) -> anyhow::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let mut cfg = Config::from_yaml_str(&text)?;
    for o in overrides {
        let (key, value) = o
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("bad -D override `{o}`, expected key=value"))?;
        cfg.set(key, value);
    }
    Ok(cfg)
}

fn register_all(ctx: &Context) {
    wireloom_transport_tcp::register(ctx);
    wireloom_transport_udp::register(ctx);
    wireloom_stream::register(ctx);
}

fn check(path: PathBuf, overrides: Vec<String>) -> i32 {
    let cfg = match load_config(&path, &overrides) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "config error");
            return 1;
        }
    };
    let ctx = Context::new();
    register_all(&ctx);
    match Processor::build(&cfg, &ctx) {
        Ok(_) => {
            tracing::info!(config = %path.display(), "config is valid");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to build object graph");
            1
        }
    }
}

fn run(path: PathBuf, overrides: Vec<String>) -> i32 {
    let cfg = match load_config(&path, &overrides) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "config error");
            return 1;
        }
    };

    let ctx = Context::new();
    register_all(&ctx);

    let mut processor = match Processor::build(&cfg, &ctx) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(error = %e, "failed to build object graph");
            return 1;
        }
    };
    if let Err(e) = processor.start() {
        tracing::error!(error = %e, "failed to activate root objects");
        return 1;
    }

    let shutdown_requested = spawn_signal_watch();

    loop {
        if shutdown_requested.try_recv().is_ok() {
            tracing::info!("shutdown signal received");
            processor.request_shutdown();
        }
        match processor.poll_once(Duration::from_millis(100)) {
            Ok(true) => continue,
            Ok(false) => break,
            Err(e) => {
                tracing::error!(error = %e, "processor poll failed");
                processor.shutdown();
                return 1;
            }
        }
    }

    processor.shutdown();
    0
}

/// Runs a single-threaded tokio runtime on its own OS thread purely to await
/// SIGINT/SIGTERM; the processor and its workers stay plain OS threads, per
/// the split described for the CLI's signal handling. Returns the receiving
/// half of a one-shot-ish channel the run loop polls each tick.
fn spawn_signal_watch() -> std::sync::mpsc::Receiver<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build signal-watch runtime");
        rt.block_on(async {
            let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        });
        let _ = tx.send(());
    });
    rx
}
