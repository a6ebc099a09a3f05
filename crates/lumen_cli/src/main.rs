use anyhow::{Context, Result};
use clap::Parser;
use lumen_core::load_scene;
use lumen_renderer::{create_integrator, render_frame, RenderConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Render a JSON scene to a PNG image.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Scene file to render
    scene: PathBuf,

    /// Render settings as JSON; defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output image path
    #[arg(short, long, default_value = "render.png")]
    output: PathBuf,

    /// Intersect on the GPU instead of the CPU
    #[arg(long)]
    gpu: bool,

    /// Number of render workers
    #[arg(short, long)]
    threads: Option<usize>,

    /// Width of the rendered image
    #[arg(long)]
    width: Option<u32>,

    /// Height of the rendered image
    #[arg(long)]
    height: Option<u32>,

    /// Seed for ambient occlusion sampling
    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    /// Config file (or defaults) with command-line overrides applied.
    fn render_config(&self) -> Result<RenderConfig> {
        let mut config = match &self.config {
            Some(path) => RenderConfig::from_json_file(path)
                .with_context(|| format!("reading config {}", path.display()))?,
            None => RenderConfig::default(),
        };

        config.gpu |= self.gpu;
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();
    let config = args.render_config()?;

    let start = Instant::now();
    let scene = load_scene(&args.scene)
        .with_context(|| format!("loading scene {}", args.scene.display()))?;
    log::info!("Scene loaded in {:.2?}", start.elapsed());

    let integrator = create_integrator(Arc::new(scene), &config)?;
    let frame = render_frame(Arc::new(integrator), &config)?;

    frame
        .save_png(&args.output)
        .with_context(|| format!("writing {}", args.output.display()))?;

    log::info!("Done in {:.2?}", start.elapsed());
    Ok(())
}
