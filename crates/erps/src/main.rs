//! ERPS daemon entry point.
//!
//! Loads the switch and ring configuration, runs the ring protection engine
//! over a simulated switch and drives its timers until interrupted.

use clap::{Parser, ValueEnum};
use erps::daemon::{DaemonConfig, ErpsDaemon, ErpsDaemonConfig};
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// G.8032 Ethernet Ring Protection Switching daemon
#[derive(Parser, Debug)]
#[command(name = "erpsd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Switch and ERPS instance configuration (JSON)
    #[arg(short = 'c', long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Upper bound on the timer loop sleep in milliseconds
    #[arg(long, default_value = "1000")]
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match args.log_format {
        LogFormat::Text => {
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level)).init();
        }
        LogFormat::Json => erps::audit::init_json_logging(&args.log_level),
    }

    info!("Starting erpsd");
    info!("Config file: {}", args.config.display());
    info!("Tick: {}ms", args.tick_ms);

    let conf = match DaemonConfig::load(&args.config) {
        Ok(conf) => conf,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut daemon = ErpsDaemon::new(ErpsDaemonConfig { tick_ms: args.tick_ms }, &conf);
    let accepted = daemon.init(&conf);
    if accepted < conf.instances.len() {
        warn!("{} of {} instances rejected", conf.instances.len() - accepted, conf.instances.len());
    }
    daemon.start();

    let daemon = Arc::new(Mutex::new(daemon));
    let timer_daemon = Arc::clone(&daemon);

    let timer_handle = tokio::spawn(async move {
        loop {
            let wait = {
                let mut daemon = timer_daemon.lock().await;
                if !daemon.is_running() {
                    break;
                }
                daemon.tick()
            };
            tokio::time::sleep(wait).await;
        }
    });

    match tokio::signal::ctrl_c().await {
        Ok(()) => warn!("Received SIGINT, shutting down gracefully..."),
        Err(err) => error!("Failed to listen for ctrl-c: {}", err),
    }

    {
        let mut daemon = daemon.lock().await;
        daemon.stop();
        match serde_json::to_string_pretty(&daemon.status_report()) {
            Ok(report) => info!("Final status: {}", report),
            Err(e) => warn!("Failed to encode status report: {}", e),
        }
    }

    if let Err(e) = timer_handle.await {
        error!("Timer task failed: {}", e);
    }

    info!("erpsd shutdown complete");
    ExitCode::SUCCESS
}
