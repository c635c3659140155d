//! Gesture capture CLI
//!
//! Runs a capture session: landmark source, training service client,
//! background sync, control API and an interactive console.

mod console;
mod pipeline;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use gesture_backend::{FamilyId, HttpTrainingService, TrainingService};
use gesture_session::{
    create_router, Config, Coordinator, ProcessDetector, ReplayDetector, SyncIntervals,
    SyncScheduler,
};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

/// How long teardown waits for in-flight service calls.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Gesture capture and training session
///
/// Streams hand landmarks from a detector, labels them into samples for the
/// training service, and runs training and live prediction.
#[derive(Parser, Debug)]
#[command(name = "gesture")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: gesture.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Class family: vocales, numeros or operaciones
    #[arg(short, long, value_name = "FAMILY")]
    family: Option<String>,

    /// Base URL of the training service
    #[arg(long, value_name = "URL")]
    backend_url: Option<String>,

    /// Port for the control API server
    #[arg(short, long)]
    port: Option<u16>,

    /// Replay a JSON-lines landmark recording instead of running the detector
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Frame rate of the replay
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Do not read commands from stdin
    #[arg(long)]
    no_console: bool,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // RUST_LOG wins over --verbose
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("Gesture session starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run_session(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run_session(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(ref family) = args.family {
        config.family = FamilyId::from_str_case_insensitive(family).ok_or_else(|| {
            anyhow::anyhow!(
                "Unknown family '{family}'\n\nSuggestion: Use vocales, numeros or operaciones"
            )
        })?;
    }
    if let Some(ref url) = args.backend_url {
        config.backend_url.clone_from(url);
    }
    if let Some(port) = args.port {
        config.control_port = port;
    }
    config.validate()?;

    print_config(&config);

    let service = HttpTrainingService::new(&config.backend_url, config.request_timeout())?;
    if let Err(e) = service.health_check().await {
        tracing::warn!(error = %e, url = %config.backend_url, "Training service is not reachable yet");
        println!("Warning: training service at {} is not reachable ({e})", config.backend_url);
    }

    let coordinator = Coordinator::new(service, &config);
    let sync = SyncScheduler::spawn(coordinator.clone(), SyncIntervals::from(&config));

    let addr: SocketAddr = ([127, 0, 0, 1], config.control_port).into();
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;
    let router = create_router(coordinator.clone());
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });
    println!("Control API running on http://{addr}");

    let (stop_pipeline, stop_rx) = watch::channel(false);
    let (restart, restart_rx) = mpsc::channel(1);
    let max_hands = config.detector.max_hands;
    let pipeline = match args.replay {
        Some(path) => {
            println!("Replaying {} at {} fps", path.display(), args.fps);
            let detector = ReplayDetector::new(path)
                .with_fps(args.fps)
                .with_frame_size(config.detector.frame_width, config.detector.frame_height);
            tokio::spawn(pipeline::supervise(
                detector,
                coordinator.clone(),
                max_hands,
                restart_rx,
                stop_rx,
            ))
        }
        None => match ProcessDetector::from_config(&config.detector) {
            Ok(detector) => tokio::spawn(pipeline::supervise(
                detector,
                coordinator.clone(),
                max_hands,
                restart_rx,
                stop_rx,
            )),
            Err(e) => {
                eprintln!("{e}");
                drop(restart_rx);
                coordinator.pipeline_failed(&e).await;
                tokio::spawn(async {})
            }
        },
    };

    let (quit, mut quit_rx) = watch::channel(false);
    let mut background: Vec<JoinHandle<()>> = Vec::new();
    if !args.no_console {
        background.push(tokio::spawn(console::print_events(coordinator.subscribe())));
        background.push(tokio::spawn(console::run(coordinator.clone(), restart, quit)));
    }

    println!("Press Ctrl+C to stop");
    tokio::select! {
        Ok(()) = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        // disabled once the console stops on end of input
        Ok(_) = quit_rx.wait_for(|quit| *quit) => {
            tracing::info!("Quit requested");
        }
        else => {
            tracing::warn!("No shutdown signal available");
        }
    }

    println!();
    println!("Shutting down...");
    stop_pipeline.send_replace(true);
    if let Err(e) = pipeline.await {
        tracing::warn!(error = %e, "Landmark pipeline did not stop cleanly");
    }
    sync.join().await;
    if tokio::time::timeout(DRAIN_TIMEOUT, coordinator.quiesce())
        .await
        .is_err()
    {
        tracing::warn!("Abandoning service calls still in flight");
    }
    server.abort();
    for task in background {
        task.abort();
    }

    println!();
    println!("{}", console::render_status(&coordinator.snapshot().await));
    Ok(())
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

fn print_config(config: &Config) {
    println!("Gesture session");
    println!("  Family:          {}", config.family);
    println!("  Training service: {}", config.backend_url);
    println!("  Samples/class:   {}", config.samples_per_class);
    println!(
        "  Detector:        {}",
        config.detector.command.as_deref().unwrap_or("(none)")
    );
}
