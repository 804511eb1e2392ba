//! Combat Monitor - real-time combat log monitoring with webhook relay.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use chrono::{Local, NaiveDate, Offset};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use combat_monitor::config::{ConfigLoader, MonitorConfig};
use combat_monitor::display;
use combat_monitor::monitor::{RealTimeMonitor, StartOptions};
use combat_monitor::parser::{parse_log_file, DaocTranslator};
use combat_monitor::server::MonitorServer;
use combat_monitor::watcher::TailPosition;
use combat_monitor::webhook::WebhookConfig;

const WEBHOOK_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(
    name = "combat-monitor",
    about = "Real-time combat log monitor with session detection and webhook relay",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file. Defaults to .combat-monitor.toml or the user config dir.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow a growing log file and report combat in real time.
    Watch {
        /// Log file to follow.
        file: PathBuf,
        /// Read the existing content before following.
        #[arg(long)]
        from_beginning: bool,
        /// Load the resume position from this file and save it on exit.
        #[arg(long)]
        position_file: Option<PathBuf>,
        /// Webhook URL to notify (repeatable).
        #[arg(long = "webhook")]
        webhooks: Vec<String>,
        /// Start the HTTP control server.
        #[arg(long)]
        serve: bool,
        /// Port for the HTTP control server.
        #[arg(long)]
        port: Option<u16>,
        /// Print every raw line.
        #[arg(long)]
        raw: bool,
    },
    /// Translate a complete log file and print its combat events.
    Parse {
        /// Log file to read.
        file: PathBuf,
        /// Date of the log (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<MonitorConfig, String> {
    let loader = path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    loader.load().map_err(|e| e.to_string())
}

fn load_position(path: &Path) -> Result<Option<TailPosition>, String> {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| format!("Invalid position file {}: {e}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(format!("Cannot read {}: {e}", path.display())),
    }
}

fn save_position(path: &Path, position: TailPosition) -> Result<(), String> {
    let json = serde_json::to_string_pretty(&position).map_err(|e| e.to_string())?;
    std::fs::write(path, json).map_err(|e| format!("Cannot write {}: {e}", path.display()))
}

struct WatchArgs {
    file: PathBuf,
    from_beginning: bool,
    position_file: Option<PathBuf>,
    webhooks: Vec<String>,
    serve: bool,
    port: Option<u16>,
    raw: bool,
}

async fn run_watch(mut config: MonitorConfig, args: WatchArgs) -> Result<(), String> {
    if let Some(port) = args.port {
        config.server.port = port;
    }
    let server_config = config.server.clone();

    let monitor = RealTimeMonitor::from_config(config)
        .await
        .map_err(|e| e.to_string())?;
    for url in args.webhooks {
        monitor
            .webhooks()
            .add_webhook(WebhookConfig::new(url))
            .await
            .map_err(|e| e.to_string())?;
    }

    let resume_from = match &args.position_file {
        Some(path) => load_position(path)?,
        None => None,
    };
    let options = StartOptions {
        resume_from,
        from_beginning: args.from_beginning.then_some(true),
    };

    let cancel = CancellationToken::new();
    let server = args.serve.then(|| {
        let server = MonitorServer::new(monitor.clone(), cancel.clone()).with_config(server_config);
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                display::print_error(&e.to_string());
            }
        })
    });

    // Subscribe before starting so the start notification is printed.
    let mut events = monitor.subscribe();
    let position = monitor
        .start(&args.file, options)
        .await
        .map_err(|e| e.to_string())?;
    tracing::info!(
        file = %args.file.display(),
        offset = position.byte_offset,
        line = position.line_number,
        "Monitoring log file"
    );

    let raw = args.raw;
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => display::print_monitor_event(&event, raw),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Display fell behind, notifications dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
    }

    let position = monitor.stop().await;
    monitor.webhooks().shutdown(WEBHOOK_GRACE).await;
    cancel.cancel();
    if let Some(server) = server {
        let _ = server.await;
    }
    printer.abort();

    display::print_status(&monitor.status().await);
    if let Some(path) = &args.position_file {
        save_position(path, position)?;
    }
    Ok(())
}

async fn run_parse(file: &Path, date: Option<NaiveDate>) -> Result<(), String> {
    let translator = match date {
        Some(date) => DaocTranslator::with_date(date).with_offset(Local::now().offset().fix()),
        None => DaocTranslator::new(),
    };
    let events = parse_log_file(file, &translator)
        .await
        .map_err(|e| format!("Cannot read {}: {e}", file.display()))?;
    for event in &events {
        display::print_combat_event(event);
    }
    tracing::info!(events = events.len(), "Parsed log file");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match load_config(cli.config) {
        Ok(config) => config,
        Err(e) => {
            display::print_error(&e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Watch {
            file,
            from_beginning,
            position_file,
            webhooks,
            serve,
            port,
            raw,
        } => {
            let args = WatchArgs {
                file,
                from_beginning,
                position_file,
                webhooks,
                serve,
                port,
                raw,
            };
            run_watch(config, args).await
        }
        Commands::Parse { file, date } => run_parse(&file, date).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            display::print_error(&e);
            ExitCode::FAILURE
        }
    }
}
