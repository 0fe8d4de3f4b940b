use std::fs::OpenOptions;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use colored::{ColoredString, Colorize};
use env_logger::{Builder, Target};
use log::{error, info, Level};

mod api;
mod error;
mod settings;

mod engine {
    pub mod durable;
    pub mod model_manager;
    pub mod normalizer;
    pub mod predictor;
    pub mod retrain;
    pub mod sample_store;

    /// Width of every feature vector the service accepts.
    pub const FEATURE_WIDTH: usize = 6;
}
mod lln {
    pub mod activation;
    pub mod dense;
    pub mod dropout;
    pub mod error;
    pub mod layer;
    pub mod loss;
    pub mod neural_network;
    pub mod optimizer;
}

use engine::predictor::FeedbackPredictor;
use error::{PredictorError, Result};
use settings::{LoggingSettings, Settings};

#[tokio::main]
async fn main() {
    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to load settings: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = setup_logging(&settings.logging) {
        eprintln!("Failed to set up logging: {e}");
        std::process::exit(2);
    }
    info!("Starting feedback predictor...");

    if let Err(e) = run(settings).await {
        error!("Fatal: {e}");
        std::process::exit(1);
    }
}

fn setup_logging(logging: &LoggingSettings) -> Result<()> {
    let mut builder = Builder::new();
    builder.filter_level(logging.level_filter()?).parse_default_env();

    if let Some(path) = &logging.file {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| PredictorError::io(path, e))?;
        colored::control::set_override(false);
        builder.target(Target::Pipe(Box::new(file)));
    } else {
        builder.target(Target::Stderr);
    }

    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {} [{}] {}",
                buf.timestamp(),
                level_tag(record.level()),
                record.target(),
                record.args()
            )
        })
        .init();
    Ok(())
}

fn level_tag(level: Level) -> ColoredString {
    match level {
        Level::Error => "ERROR".red().bold(),
        Level::Warn => "WARN ".yellow(),
        Level::Info => "INFO ".green(),
        Level::Debug => "DEBUG".blue(),
        Level::Trace => "TRACE".dimmed(),
    }
}

/// Loads everything before binding, so the first accepted request already sees the persisted
/// dataset and model.
async fn run(settings: Settings) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .map_err(|e| PredictorError::InvalidSettings(format!("server address: {e}")))?;

    let open_with = settings.clone();
    let predictor =
        tokio::task::spawn_blocking(move || FeedbackPredictor::open(&open_with)).await??;
    let status = predictor.status();
    info!(
        "Ready with {} samples (retrain past {}), model artifact {}",
        status.samples,
        status.retrain_threshold,
        if status.artifact_present { "loaded" } else { "absent" }
    );

    let routes = api::routes(Arc::new(predictor));
    let (bound, server) =
        warp::serve(routes).try_bind_with_graceful_shutdown(addr, shutdown_signal())?;
    info!("Server is running on {bound}");

    server.await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            error!("Cannot listen for shutdown signal: {e}");
            std::future::pending::<()>().await;
        }
    }
}
