use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use nanoclaw_bridge::app::{handle_fatal_error, initialize_app, AppConfig};
use nanoclaw_bridge::config::BridgeConfig;
use nanoclaw_bridge::error::BridgeError;
use nanoclaw_bridge::ipc::{CommandHandler, IpcCommand, IpcWatcher};
use nanoclaw_bridge::subprocess::streaming::{
    parse_buffered_output, ContainerOutputEvent, OutputHandler, ParseError, SentinelMarkers,
    SessionRunner, StreamOutputDemux,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

/// Environment variable through which `run` hands the marker nonce to the child
const NONCE_ENV: &str = "NANOCLAW_OUTPUT_NONCE";

/// Host-side bridge for sandboxed agent containers
#[derive(Parser)]
#[command(name = "nanoclaw-bridge", version)]
#[command(about = "Guarded IPC ingestion and sentinel output demultiplexing for agent containers", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the IPC drop directories and print accepted commands as JSON lines
    Watch {
        /// Scan once and exit instead of polling
        #[arg(long)]
        once: bool,

        /// Override the IPC base directory (default: <data_dir>/ipc)
        #[arg(long)]
        ipc_dir: Option<PathBuf>,
    },
    /// Demultiplex sentinel-wrapped payloads from stdin into JSON lines
    Demux {
        /// Nonce used to build per-run markers
        #[arg(long)]
        nonce: Option<String>,

        /// Treat stdin as the complete output of a non-streaming runner and
        /// print only its single result
        #[arg(long)]
        buffered: bool,
    },
    /// Run a container command and print its structured output as JSON lines
    Run {
        /// Nonce used to build per-run markers; exported to the child
        #[arg(long)]
        nonce: Option<String>,

        /// File whose contents are written to the child's stdin
        #[arg(long)]
        input: Option<PathBuf>,

        /// Name used for the session in logs
        #[arg(long, default_value = "container")]
        label: String,

        /// Program and arguments
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let app = AppConfig::new(cli.verbose).with_config_path(cli.config.clone());
    let config = match initialize_app(app) {
        Ok(config) => config,
        Err(e) => handle_fatal_error(e.into(), cli.verbose),
    };

    let result = match cli.command {
        Commands::Watch { once, ipc_dir } => run_watch(&config, once, ipc_dir).await,
        Commands::Demux { nonce, buffered } => run_demux(nonce, buffered).await,
        Commands::Run {
            nonce,
            input,
            label,
            command,
        } => run_session(&config, nonce, input, label, command).await,
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => handle_fatal_error(e, cli.verbose),
    }
}

/// Writes every accepted command or output event to stdout as one JSON line
struct JsonLinesPrinter;

impl JsonLinesPrinter {
    fn print(value: &impl serde::Serialize) -> Result<()> {
        let line = serde_json::to_string(value)?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}").context("Failed to write to stdout")?;
        stdout.flush().context("Failed to flush stdout")?;
        Ok(())
    }
}

#[async_trait]
impl CommandHandler for JsonLinesPrinter {
    async fn handle(&self, command: &IpcCommand) -> Result<()> {
        if !command.payload.is_object() {
            anyhow::bail!("IPC command must be a JSON object");
        }
        Self::print(command)
    }
}

#[async_trait]
impl OutputHandler for JsonLinesPrinter {
    async fn on_output(&self, event: ContainerOutputEvent) -> Result<()> {
        Self::print(&event)
    }

    fn on_session_id(&self, session_id: &str) {
        info!(session_id, "Container announced a new session");
    }

    fn on_parse_error(&self, raw: &str, error: &ParseError) {
        warn!(raw_len = raw.len(), "Skipping unparseable output payload: {}", error);
    }
}

fn markers_for(nonce: Option<&str>) -> Result<SentinelMarkers> {
    match nonce {
        Some(nonce) if nonce.is_empty() || nonce.chars().any(char::is_whitespace) => {
            Err(BridgeError::InvalidArgument(format!("invalid nonce {nonce:?}")).into())
        }
        Some(nonce) => Ok(SentinelMarkers::with_nonce(nonce)),
        None => Ok(SentinelMarkers::default()),
    }
}

async fn run_watch(config: &BridgeConfig, once: bool, ipc_dir: Option<PathBuf>) -> Result<i32> {
    let mut watcher_config = config.watcher_config();
    if let Some(dir) = ipc_dir {
        watcher_config.base_dir = dir;
    }
    let watcher = IpcWatcher::new(watcher_config, Arc::new(JsonLinesPrinter));

    if once {
        let report = watcher
            .process_once()
            .await
            .map_err(BridgeError::from)
            .context("IPC scan failed")?;
        info!(
            groups = report.groups,
            discovered = report.discovered,
            consumed = report.consumed,
            quarantined = report.quarantined,
            "IPC scan complete"
        );
        return Ok(0);
    }

    watcher
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
        .map_err(BridgeError::from)
        .context("IPC watcher stopped")?;
    Ok(0)
}

async fn run_demux(nonce: Option<String>, buffered: bool) -> Result<i32> {
    let markers = markers_for(nonce.as_deref())?;

    if buffered {
        let mut stdout = String::new();
        tokio::io::stdin()
            .read_to_string(&mut stdout)
            .await
            .context("Failed to read stdin")?;
        return match parse_buffered_output(&stdout, &markers) {
            Ok(event) => {
                JsonLinesPrinter::print(&event)?;
                Ok(0)
            }
            Err(e) => {
                eprintln!("No result found in output: {e}");
                Ok(1)
            }
        };
    }

    let mut demux = StreamOutputDemux::with_markers(Arc::new(JsonLinesPrinter), markers);

    let mut stdin = tokio::io::stdin();
    let mut buf = vec![0u8; 8192];
    loop {
        let n = stdin
            .read(&mut buf)
            .await
            .context("Failed to read stdin")?;
        if n == 0 {
            break;
        }
        demux.feed_bytes(&buf[..n]);
    }
    demux.finish();

    demux
        .settled()
        .await
        .map_err(BridgeError::from)
        .context("Output delivery did not complete")?;

    info!(
        events = demux.events_extracted(),
        parse_errors = demux.parse_errors(),
        discarded_bytes = demux.discarded_bytes(),
        new_session_id = ?demux.new_session_id(),
        "Input stream demultiplexed"
    );
    Ok(0)
}

async fn run_session(
    config: &BridgeConfig,
    nonce: Option<String>,
    input: Option<PathBuf>,
    label: String,
    command: Vec<String>,
) -> Result<i32> {
    let markers = markers_for(nonce.as_deref())?;
    let (program, args) = command
        .split_first()
        .ok_or_else(|| BridgeError::InvalidArgument("missing program to run".to_string()))?;

    let input = match input {
        Some(path) => Some(
            tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read input file {}", path.display()))?,
        ),
        None => None,
    };

    let mut child = tokio::process::Command::new(program);
    child.args(args);
    if let Some(nonce) = &nonce {
        child.env(NONCE_ENV, nonce);
    }

    let runner = SessionRunner::new(config.session_limits())
        .with_markers(markers)
        .with_label(label);
    let outcome = runner.run(child, input, Arc::new(JsonLinesPrinter)).await?;

    for failure in &outcome.delivery_failures {
        warn!("{}", failure);
    }

    if outcome.is_success() && outcome.delivery_failures.is_empty() {
        Ok(0)
    } else {
        if let Some(error) = &outcome.error {
            eprintln!("{error}");
        }
        Ok(1)
    }
}
