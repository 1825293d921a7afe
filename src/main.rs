// SPDX-License-Identifier: GPL-3.0-only

use camera_pipeline::cli::{self, RunOptions};
use camera_pipeline::constants::CameraFacing;
use camera_pipeline::gpu::BackendKind;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "camera-pipeline")]
#[command(about = "Camera capture and GPU compositing pipeline demo")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    /// Config file (default: ~/.config/camera-pipeline/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum FacingArg {
    Front,
    Back,
}

impl From<FacingArg> for CameraFacing {
    fn from(arg: FacingArg) -> Self {
        match arg {
            FacingArg::Front => CameraFacing::Front,
            FacingArg::Back => CameraFacing::Back,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Software,
    Wgpu,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Software => BackendKind::Software,
            BackendArg::Wgpu => BackendKind::Wgpu,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the synthetic camera through the pipeline into an in-memory window
    Run {
        /// Number of frames to present before stopping
        #[arg(short, long, default_value = "30")]
        frames: u64,

        /// Camera to open
        #[arg(long, value_enum, default_value = "front")]
        facing: FacingArg,

        /// Requested capture width
        #[arg(long, default_value = "320")]
        width: u32,

        /// Requested capture height
        #[arg(long, default_value = "240")]
        height: u32,

        /// Display rotation in degrees (0, 90, 180, 270)
        #[arg(short, long, default_value = "0", allow_negative_numbers = true)]
        rotation: i32,

        /// Force a mirrored preview
        #[arg(long)]
        mirror: bool,

        /// PNG overlaid on every frame
        #[arg(long)]
        watermark: Option<PathBuf>,

        /// Watermark opacity (0.0 - 1.0)
        #[arg(long, default_value = "1.0")]
        alpha: f32,

        /// Where to save the last presented frame (default: ~/Pictures/Camera/pipeline_TIMESTAMP.png)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// GPU backend (default: from config)
        #[arg(long, value_enum)]
        backend: Option<BackendArg>,
    },

    /// Print the effective configuration as JSON
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Set RUST_LOG to control the log level, e.g. RUST_LOG=camera_pipeline=debug
    let default_filter = cli::load_config(cli.config.as_deref())
        .ok()
        .and_then(|config| config.log_filter)
        .unwrap_or_else(|| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(true)
        .with_level(true)
        .init();

    match cli.command {
        Commands::Run {
            frames,
            facing,
            width,
            height,
            rotation,
            mirror,
            watermark,
            alpha,
            output,
            backend,
        } => cli::run_pipeline(RunOptions {
            frames,
            facing: facing.into(),
            width,
            height,
            display_rotation: rotation,
            mirror,
            watermark,
            alpha,
            output,
            backend: backend.map(Into::into),
            config: cli.config,
        }),
        Commands::Config => cli::print_config(cli.config.as_deref()),
    }
}
