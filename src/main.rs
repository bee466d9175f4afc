//! footvault — archive Rhombus camera footage to local disk
//!
//! Usage:
//!   footvault fetch -a <key> --camera-uuid <uuid> -s 1700000000 -u 600 -d ./out
//!   footvault cameras -a <key> --location-uuid <uuid>
//!   footvault inspect --dir ./out/Lobby_<uuid>

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use footvault::config::Config;
use footvault::controller::RunController;
use footvault::manifest::Manifest;
use footvault::model::{format_epoch, TimeWindow};
use footvault::rhombus::RhombusClient;
use footvault::source::{Scope, ScopeResolver, StaticScope};

/// Window length when `--duration` is not given.
const DEFAULT_DURATION_SECS: u64 = 3600;

#[derive(Parser)]
#[command(name = "footvault", about = "Archive Rhombus camera footage", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ConnectArgs {
    /// Optional TOML configuration file; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Rhombus API key.
    #[arg(short = 'a', long)]
    api_key: Option<String>,
    /// Client certificate (PEM) for mutual TLS.
    #[arg(short = 'c', long)]
    cert: Option<PathBuf>,
    /// Private key (PEM) matching --cert.
    #[arg(short = 'p', long)]
    private_key: Option<PathBuf>,
    /// Download over WAN media URIs instead of LAN.
    #[arg(short = 'w', long)]
    usewan: bool,
    /// Verbose logging.
    #[arg(short = 'g', long)]
    debug: bool,
    /// Restrict to cameras at this location.
    #[arg(long)]
    location_uuid: Option<String>,
    /// Restrict to this camera.
    #[arg(long)]
    camera_uuid: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Download footage for every camera in scope.
    Fetch {
        #[command(flatten)]
        connect: ConnectArgs,
        /// Window start, epoch seconds. Defaults to one hour ago.
        #[arg(short = 's', long)]
        start_time: Option<i64>,
        /// Window length in seconds.
        #[arg(short = 'u', long)]
        duration: Option<u64>,
        /// Root directory for camera archives.
        #[arg(short = 'd', long)]
        destination: Option<PathBuf>,
    },
    /// Print the cameras a scope resolves to.
    Cameras {
        #[command(flatten)]
        connect: ConnectArgs,
    },
    /// Summarize an existing camera archive.
    Inspect {
        /// Camera directory containing manifest.json.
        #[arg(long)]
        dir: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let debug = match &cli.command {
        Command::Fetch { connect, .. } | Command::Cameras { connect } => connect.debug,
        Command::Inspect { .. } => false,
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" })),
        )
        .init();

    let result = match cli.command {
        Command::Fetch { connect, start_time, duration, destination } => {
            run_fetch(connect, start_time, duration, destination).await
        }
        Command::Cameras { connect } => run_cameras(connect).await,
        Command::Inspect { dir } => run_inspect(&dir),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!(error = %format!("{e:#}"), "footvault failed");
            std::process::exit(1);
        }
    }
}

fn load_config(args: &ConnectArgs, destination: Option<PathBuf>) -> anyhow::Result<Config> {
    let mut cfg = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(key) = &args.api_key {
        cfg.api.api_key = Some(key.clone());
    }
    if args.cert.is_some() || args.private_key.is_some() {
        cfg.api.cert = args.cert.clone();
        cfg.api.private_key = args.private_key.clone();
    }
    cfg.api.use_wan |= args.usewan;
    if let Some(dest) = destination {
        cfg.archive.destination = dest;
    }
    cfg.validate()?;
    Ok(cfg)
}

fn scope_of(args: &ConnectArgs) -> Scope {
    Scope { location: args.location_uuid.clone(), camera: args.camera_uuid.clone() }
}

/// Cameras declared in the config file take precedence over the API's list.
fn scope_resolver(cfg: &Config, client: &Arc<RhombusClient>) -> Arc<dyn ScopeResolver> {
    if cfg.cameras.is_empty() {
        client.clone() as Arc<dyn ScopeResolver>
    } else {
        Arc::new(StaticScope::new(cfg.static_cameras()))
    }
}

async fn run_fetch(
    connect: ConnectArgs,
    start_time: Option<i64>,
    duration: Option<u64>,
    destination: Option<PathBuf>,
) -> anyhow::Result<i32> {
    let cfg = load_config(&connect, destination)?;
    let now = Utc::now().timestamp();
    let window = TimeWindow::new(
        start_time.unwrap_or(now - DEFAULT_DURATION_SECS as i64),
        duration.unwrap_or(DEFAULT_DURATION_SECS),
    )?;

    let client = Arc::new(RhombusClient::connect(&cfg.api).await?);
    let controller = RunController::new(client.clone(), scope_resolver(&cfg, &client), &cfg);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Received CTRL+C, cancelling run…");
                on_signal.cancel();
            }
            Err(e) => error!(error = %e, "Signal error"),
        }
    });

    let summary = controller
        .run(&scope_of(&connect), window, cancel)
        .await
        .context("archival run failed")?;
    summary.log();
    Ok(summary.exit_code())
}

async fn run_cameras(connect: ConnectArgs) -> anyhow::Result<i32> {
    let cfg = load_config(&connect, None)?;
    let client = Arc::new(RhombusClient::connect(&cfg.api).await?);
    let scope = scope_of(&connect);
    let cameras = scope_resolver(&cfg, &client)
        .resolve(&scope)
        .await
        .with_context(|| format!("cannot resolve {scope}"))?;

    info!(cameras = cameras.len(), %scope, "Scope resolved");
    for cam in &cameras {
        println!(
            "{}  {}  location={}",
            cam.id,
            cam.name.as_deref().unwrap_or("-"),
            cam.location_id.as_deref().unwrap_or("-")
        );
    }
    Ok(if cameras.is_empty() { 1 } else { 0 })
}

fn run_inspect(dir: &std::path::Path) -> anyhow::Result<i32> {
    let m = Manifest::load(dir).with_context(|| format!("cannot read manifest in {}", dir.display()))?;

    println!("=== {} ===", m.camera_name.as_deref().unwrap_or(&m.camera_id));
    println!("Camera      : {}", m.camera_id);
    println!("Window      : {} .. {}", m.window.start_utc, m.window.end_utc);
    println!("Status      : {:?}", m.status);
    println!(
        "Segments    : {} ok, {} failed, {} bytes",
        m.totals.succeeded, m.totals.failed, m.totals.bytes
    );
    if let Some(file) = &m.stitched_file {
        println!("Video       : {file}");
    }
    if let Some(err) = &m.listing_error {
        println!("Listing     : {err}");
    }
    for gap in &m.gaps {
        println!(
            "  gap {} .. {} ({}s, {:?})",
            format_epoch(gap.start),
            format_epoch(gap.end),
            gap.end - gap.start,
            gap.cause
        );
    }
    for f in &m.failures {
        println!("  failed {} ({:?}, {} attempts): {}", format_epoch(f.start), f.kind, f.attempts, f.reason);
    }
    Ok(if m.status.is_usable() { 0 } else { 1 })
}
