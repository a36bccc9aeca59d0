//! anime2x command-line front end
//!
//! Gathers the submission from the command line, runs the preflight checks,
//! submits the batch and prints the progress stream. Ctrl-C cancels the run.

use anime2x_engine::{
    collect_inputs, run_preflight, run_status_server, Config, ConfigError, Engine, FailurePolicy,
    JobParameters, Multiplier, ProgressKind,
};
use clap::{ArgAction, Parser};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_CONFIG: &str = "config.toml";

/// anime2x - interpolate and upscale videos through rife and Real-ESRGAN
#[derive(Parser, Debug)]
#[command(name = "anime2x")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input videos, or directories to search for videos
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory receiving the results and the working frame directories
    #[arg(short, long)]
    output: PathBuf,

    /// Frame interpolation multiplier (1, 2 or 4)
    #[arg(short, long, default_value = "1")]
    interpolate: Multiplier,

    /// Upscaling multiplier (1, 2 or 4)
    #[arg(short, long, default_value = "1")]
    upscale: Multiplier,

    /// Output container, e.g. mp4 or gif (default: keep the input's)
    #[arg(short, long)]
    format: Option<String>,

    /// Open the output directory when the batch finishes
    #[arg(long)]
    reveal: bool,

    /// Path to the configuration file (config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Skip the tool checks before submitting
    #[arg(long)]
    skip_checks: bool,

    /// Serve the engine status as JSON on this address, e.g. 127.0.0.1:7878
    #[arg(long)]
    status_addr: Option<SocketAddr>,

    /// Skip failing inputs instead of stopping the batch
    #[arg(long)]
    keep_going: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn job_parameters(&self) -> JobParameters {
        let params = JobParameters::new(collect_inputs(&self.inputs), &self.output)
            .with_interpolation(self.interpolate)
            .with_upscale(self.upscale)
            .with_reveal(self.reveal);
        match &self.format {
            Some(format) => params.with_format(format.clone()),
            None => params,
        }
    }

    fn load_config(&self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::load_or_default(DEFAULT_CONFIG)?,
        };
        if self.keep_going {
            config.pipeline.failure_policy = FailurePolicy::Skip;
        }
        Ok(config)
    }
}

/// Logs go to stderr so stdout carries only the progress stream.
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = match args.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if args.skip_checks {
        tracing::warn!("skipping preflight checks (--skip-checks enabled)");
    } else if let Err(e) = run_preflight(&config, args.interpolate, args.upscale) {
        eprintln!("Preflight check failed: {}", e);
        return ExitCode::FAILURE;
    }

    let (engine, mut progress) = Engine::start(config);

    if let Some(addr) = args.status_addr {
        let status = engine.status();
        tokio::spawn(async move {
            if let Err(e) = run_status_server(status, addr).await {
                tracing::error!(error = %e, "status server failed");
            }
        });
    }

    if let Err(e) = engine.submit(args.job_parameters()) {
        eprintln!("Failed to submit batch: {}", e);
        return ExitCode::FAILURE;
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;
    let mut failed_jobs = 0usize;
    let mut outcome = None;

    while outcome.is_none() {
        tokio::select! {
            result = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                match result {
                    Ok(()) => engine.cancel(),
                    Err(e) => tracing::warn!(error = %e, "could not listen for Ctrl-C"),
                }
            }
            event = progress.recv() => match event {
                Some(event) => {
                    println!("{}", event);
                    if event.kind == ProgressKind::JobFailed {
                        failed_jobs += 1;
                    }
                    if event.is_terminal() {
                        outcome = Some(event.kind);
                    }
                }
                None => outcome = Some(ProgressKind::Halted),
            },
        }
    }

    engine.shutdown().await;

    match outcome {
        Some(ProgressKind::BatchFinished) if failed_jobs == 0 => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}
