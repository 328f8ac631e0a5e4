//! Headless render: decode an image, apply saved adjustments, write the result

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use raw_render::{
    AdjustmentParameters, EngineConfig, PixelBuffer, RenderEngine, RenderRequest, RenderStatus,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "raw-render",
    author,
    version,
    about = "Render a photo with adjustment parameters"
)]
struct Cli {
    /// Source image (any format the `image` crate decodes)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Where to write the 8-bit result
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// Adjustment parameters as JSON; neutral when omitted
    #[arg(value_name = "PARAMS")]
    params: Option<PathBuf>,

    /// Render a display-sized preview instead of full resolution
    #[arg(long)]
    preview: bool,

    /// Display scale factor for previews
    #[arg(long, default_value_t = 1.0)]
    scale: f32,

    /// Engine configuration as JSON
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Skip GPU initialization and render on the CPU
    #[arg(long)]
    cpu: bool,
}

fn initialise_tracing() {
    let filter =
        EnvFilter::try_from_env("RAW_RENDER_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    initialise_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            EngineConfig::from_json(&json).context("parsing engine config")?
        }
        None => EngineConfig::default(),
    };

    let params = match &cli.params {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("reading parameters {}", path.display()))?;
            AdjustmentParameters::from_json(&json).context("parsing adjustment parameters")?
        }
        None => AdjustmentParameters::default(),
    };

    let decoded = image::open(&cli.input)
        .with_context(|| format!("decoding {}", cli.input.display()))?;
    let source = PixelBuffer::from_dynamic(&decoded);
    info!("Loaded {} ({}x{})", cli.input.display(), source.width(), source.height());

    let engine = RenderEngine::new(config)?;
    if !cli.cpu {
        match engine.initialize_gpu() {
            Ok(gpu) => info!("Rendering on {} ({:?})", gpu.adapter, gpu.backend),
            Err(err) => warn!("Falling back to CPU: {}", err),
        }
    }

    let id = engine.next_request_id();
    let request = if cli.preview {
        RenderRequest::preview(id, source, params, cli.scale)
    } else {
        RenderRequest::full(id, source, params)
    };
    let result = engine.render(request).wait();

    let rendered = match (result.status(), result.image) {
        (RenderStatus::Completed, Some(image)) => image,
        (status, _) => bail!(
            "render {:?}: {}",
            status,
            result.error.map(|e| e.to_string()).unwrap_or_default()
        ),
    };
    info!(
        "Rendered {}x{} on {:?} in {:?}",
        rendered.width(),
        rendered.height(),
        result.backend,
        result.elapsed
    );

    let (width, height) = (rendered.width(), rendered.height());
    let output = image::RgbaImage::from_raw(width, height, rendered.to_rgba8())
        .context("rendered buffer does not match its dimensions")?;
    output
        .save(&cli.output)
        .with_context(|| format!("writing {}", cli.output.display()))?;
    info!("Wrote {}", cli.output.display());

    engine.shutdown();
    Ok(())
}
