//! detect_image - run one detection pass over a JPEG file
//!
//! Uses the same preprocessing, engine and post-processing as the live loop
//! and prints the resulting batch plus its display overlay as JSON.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

use ekolenz_detect::detect::validate_output;
use ekolenz_detect::{
    overlay_for, prepare_frame, CapturedFrame, DetectionBatch, EngineKind, LoopConfig, OverlayBox,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Detect objects in a single JPEG image")]
struct Args {
    /// JPEG image to analyse.
    image: PathBuf,

    /// ONNX SSD model; selects the tract engine.
    #[arg(long, env = "EKOLENZ_MODEL_PATH")]
    model: Option<PathBuf>,

    /// Width of the display the overlay is scaled to.
    #[arg(long)]
    display_width: Option<u32>,

    /// Also upload the image to the configured endpoint.
    #[arg(long)]
    upload: bool,

    /// Pretty-print the JSON output.
    #[arg(long)]
    pretty: bool,
}

#[derive(Serialize)]
struct Report {
    image: String,
    engine: &'static str,
    batch: DetectionBatch,
    overlay: Vec<OverlayBox>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let mut config = LoopConfig::load()?;
    if let Some(model) = &args.model {
        config.engine.kind = EngineKind::Tract;
        config.engine.model_path = Some(model.clone());
    }
    let display_width = args.display_width.unwrap_or(config.display_width);
    if display_width == 0 {
        return Err(anyhow!("display width must be greater than zero"));
    }

    let jpeg = std::fs::read(&args.image)
        .with_context(|| format!("failed to read {}", args.image.display()))?;
    let frame = prepare_frame(
        CapturedFrame::Jpeg(jpeg.clone()),
        config.loop_settings.target_width,
    )?;

    let mut engine = config.engine.build()?;
    engine.load()?;
    let raw = engine.detect(&frame)?;
    validate_output(&raw)?;
    let detections = config.thresholds.post_processor().process(raw);

    let batch = DetectionBatch {
        frame_seq: 1,
        frame_width: frame.width(),
        frame_height: frame.height(),
        detections,
    };
    let report = Report {
        image: args.image.display().to_string(),
        engine: engine.name(),
        overlay: overlay_for(&batch, display_width),
        batch,
    };
    let json = if args.pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{}", json);

    if args.upload {
        upload(&config, jpeg)?;
    }
    Ok(())
}

#[cfg(feature = "http")]
fn upload(config: &LoopConfig, jpeg: Vec<u8>) -> Result<()> {
    let url = config
        .upload_url
        .as_deref()
        .ok_or_else(|| anyhow!("--upload requires upload.url or EKOLENZ_UPLOAD_URL"))?;
    let upload = ekolenz_detect::PhotoUploader::new(url)?.upload_detached(jpeg)?;
    if upload.join().is_err() {
        log::warn!("photo upload thread panicked");
    }
    Ok(())
}

#[cfg(not(feature = "http"))]
fn upload(_config: &LoopConfig, _jpeg: Vec<u8>) -> Result<()> {
    Err(anyhow!("--upload requires the http feature"))
}
