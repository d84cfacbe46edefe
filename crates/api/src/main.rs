//! Affect Pipeline - Main Entry Point

use std::path::PathBuf;

use affect::{run_stream, BlinkMonitor};
use api::settings::Settings;
use api::{init_logging, load_models, run_server, shutdown_signal};
use clap::{Parser, Subcommand};
use frame_source::{ImageDirSource, SourceConfig};
use tracing::{error, info};

/// Blink, eyebrow, and stress signals from facial landmarks
#[derive(Parser, Debug)]
#[command(name = "affect-pipeline", author, version, about, long_about = None)]
struct Args {
    /// Configuration file (defaults to config/affect.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API
    Serve {
        /// Listen address, overriding the configuration
        #[arg(long)]
        addr: Option<String>,
    },

    /// Stream a directory of frames and print one JSON record per frame
    Watch {
        /// Directory of image files, replayed in file-name order
        dir: PathBuf,

        /// Replay rate in frames per second (0 = as fast as possible)
        #[arg(long, default_value = "0")]
        fps: u32,

        /// Do not mirror frames horizontally
        #[arg(long)]
        no_mirror: bool,

        /// Also log the preview overlay text of each frame
        #[arg(long)]
        overlay: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref())?;
    init_logging(&settings.logging);

    info!("=== Affect Pipeline v{} ===", env!("CARGO_PKG_VERSION"));

    let models = match load_models(&settings) {
        Ok(models) => models,
        Err(e) => {
            error!("Startup failed: {}", e);
            return Err(e.into());
        }
    };

    match args.command {
        Command::Serve { addr } => {
            if let Some(addr) = addr {
                settings.server.addr = addr;
            }
            run_server(settings, models).await?;
        }
        Command::Watch {
            dir,
            fps,
            no_mirror,
            overlay,
        } => {
            let mut source = ImageDirSource::open(SourceConfig {
                path: dir,
                fps,
                mirror: !no_mirror,
                limits: settings.pipeline.limits,
            })?;
            let mut monitor = BlinkMonitor::new(settings.pipeline, models);

            let summary = run_stream(
                &mut source,
                &mut monitor,
                |analysis| {
                    if overlay {
                        info!("Frame {}: {}", analysis.sequence, analysis.overlay_lines().join(" | "));
                    }
                    match serde_json::to_string(analysis) {
                        Ok(line) => println!("{}", line),
                        Err(e) => error!("Failed to serialize frame {}: {}", analysis.sequence, e),
                    }
                },
                shutdown_signal(),
            )
            .await?;

            info!(
                "Processed {} frames ({} with a face, {} errors), {} blinks",
                summary.frames, summary.frames_with_face, summary.errors, summary.total_blinks
            );
        }
    }

    Ok(())
}
