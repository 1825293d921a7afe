// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for the demo binary
//!
//! - `run`: drive the synthetic camera through the whole pipeline into an
//!   in-memory window and save the last presented image
//! - `config`: print the effective configuration

use crate::backends::camera::{CameraStateListener, SyntheticCamera};
use crate::camera::CameraVideoManager;
use crate::config::PipelineConfig;
use crate::constants::{CameraFacing, MirrorMode};
use crate::consumers::{CaptureFrameConsumer, FrameRecorder};
use crate::errors::{CaptureErrorCode, PipelineError};
use crate::frame::Rotation;
use crate::gpu::{BackendKind, GpuBackend, MemoryWindow, NativeWindow};
use crate::processors::WatermarkConfig;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Default folder name for saved frames
const DEFAULT_SAVE_FOLDER: &str = "Camera";

/// Options for [`run_pipeline`]
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub frames: u64,
    pub facing: CameraFacing,
    pub width: u32,
    pub height: u32,
    pub display_rotation: i32,
    pub mirror: bool,
    pub watermark: Option<PathBuf>,
    pub alpha: f32,
    pub output: Option<PathBuf>,
    pub backend: Option<BackendKind>,
    pub config: Option<PathBuf>,
}

/// Load the config from `path`, the default location, or built-in defaults
pub fn load_config(path: Option<&Path>) -> Result<PipelineConfig, PipelineError> {
    match path {
        Some(path) => PipelineConfig::load(path),
        None => match PipelineConfig::default_path() {
            Some(path) => PipelineConfig::load(&path),
            None => Ok(PipelineConfig::default()),
        },
    }
}

/// Print the effective configuration as JSON
pub fn print_config(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(path)?;
    println!("{}", config.to_json()?);
    Ok(())
}

struct CliListener;

impl CameraStateListener for CliListener {
    fn on_first_captured_frame(&self, width: u32, height: u32) {
        info!(width, height, "First frame");
    }

    fn on_camera_capture_error(&self, code: CaptureErrorCode, message: &str) {
        eprintln!();
        eprintln!("Capture error {}: {}", code, message);
    }

    fn on_camera_open(&self) {
        info!("Camera opened");
    }

    fn on_camera_closed(&self) {
        info!("Camera closed");
    }
}

/// Run the synthetic camera through the pipeline
pub fn run_pipeline(options: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(options.config.as_deref())?;
    config.capture.facing = options.facing;
    config.capture.width = options.width;
    config.capture.height = options.height;
    if let Some(backend) = options.backend {
        config.backend = backend;
    }
    if options.mirror {
        config.mirror_mode = MirrorMode::Enabled;
    }

    let backend = GpuBackend::new(config.backend);
    println!(
        "Capturing {} frames from the {} camera ({}x{}, {} backend)",
        options.frames, options.facing, options.width, options.height, config.backend
    );

    let camera = SyntheticCamera::new();
    let manager = CameraVideoManager::new(config.clone(), backend, Box::new(camera))?;

    // Sensor images are landscape; the upright preview is portrait
    let rotation = Rotation::from_degrees_int(options.display_rotation);
    let (out_width, out_height) = (options.height, options.width);
    manager.set_display_rotation(rotation)?;

    let window = MemoryWindow::new(out_width, out_height);
    let target: Arc<dyn NativeWindow> = window.clone();
    let preview = manager.set_local_preview(target, config.preview_scale_type, Some("cli-preview"))?;

    if let Some(path) = &options.watermark {
        let bitmap = image::open(path)?.to_rgba8();
        let handle = manager.set_watermark(&bitmap, WatermarkConfig::new(out_width, out_height))?;
        handle.set_alpha(options.alpha);
        println!("Watermark: {} (alpha {:.2})", path.display(), options.alpha);
    }

    let recorder = FrameRecorder::new(Some("cli-recorder"), false);
    let recorder_consumer: Arc<dyn CaptureFrameConsumer> = recorder.clone();
    manager.attach_off_screen_consumer(recorder_consumer)?;

    let camera = manager.camera()?;
    camera.set_camera_state_listener(Some(Arc::new(CliListener)));

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    println!("Running... (press Ctrl+C to stop early)");
    camera.start_capture()?;

    let start = Instant::now();
    let deadline = Duration::from_secs(10 + options.frames / 5);
    while preview.frames_presented() < options.frames {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }
        if start.elapsed() > deadline {
            println!();
            warn!(presented = preview.frames_presented(), "Timed out waiting for frames");
            break;
        }
        print!("\rFrames: {}/{}", preview.frames_presented(), options.frames);
        std::io::Write::flush(&mut std::io::stdout())?;
        std::thread::sleep(Duration::from_millis(50));
    }
    println!();

    camera.stop_capture()?;
    let dropped = camera.capture().producer().dropped_frames();
    let delivered = camera.capture().producer().delivered_frames();
    let last = window.last_frame();
    manager.release()?;

    println!(
        "Presented {} frames, {} delivered off-screen, {} dropped in hand-off ({:.1}s)",
        preview.frames_presented(),
        recorder.frame_count(),
        dropped,
        start.elapsed().as_secs_f64()
    );
    info!(delivered, dropped, "Pipeline run finished");

    let Some(image) = last else {
        return Err("No frame was presented".into());
    };

    let output_path = match options.output {
        Some(path) => path,
        None => {
            let timestamp = Local::now().format("%Y%m%d_%H%M%S");
            get_default_output_dir().join(format!("pipeline_{}.png", timestamp))
        }
    };

    let rt = tokio::runtime::Runtime::new()?;
    let saved = rt.block_on(async {
        if let Some(parent) = output_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let path = output_path.clone();
        tokio::task::spawn_blocking(move || image.save(&path))
            .await
            .map_err(|e| PipelineError::Other(e.to_string()))??;
        Ok::<PathBuf, PipelineError>(output_path)
    })?;

    println!("Frame saved: {}", saved.display());
    Ok(())
}

/// Get default output directory
fn get_default_output_dir() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(DEFAULT_SAVE_FOLDER)
}
