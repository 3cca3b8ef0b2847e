use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tilesurface_assets::{Frame, FrameTable, SourceImage};
use tilesurface_kernel::{Scene, TickContext, TileSurface};
use tilesurface_render::{
    CanvasRenderer, DebugTextRenderer, GpuRenderer, RenderConfig, Renderer,
};
use tilesurface_render_wgpu::{OffscreenTarget, ScreenProjection, WgpuTilingRenderer};
use tiny_skia::{Color, Pixmap};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tilesurface-cli", about = "CLI tool for tiling surfaces")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Render a scrolling surface to a PNG with the raster backend
    Render {
        #[command(flatten)]
        scene: SceneArgs,
        /// Output PNG path
        #[arg(short, long, default_value = "tilesurface.png")]
        output: PathBuf,
        /// Render config JSON (resolution, round_pixels, clear_color)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Device pixels per world unit, overrides the config
        #[arg(long)]
        resolution: Option<f32>,
        /// Truncate fill rects to whole pixels
        #[arg(long)]
        round_pixels: bool,
    },
    /// Render the same scene on a headless GPU device
    Gpu {
        #[command(flatten)]
        scene: SceneArgs,
        /// Optional output PNG path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the scene state after stepping
    Inspect {
        #[command(flatten)]
        scene: SceneArgs,
    },
}

#[derive(Args)]
struct SceneArgs {
    /// Source PNG; a procedural checker is used when omitted
    #[arg(long)]
    image: Option<PathBuf>,
    /// TexturePacker JSON describing frames on the image
    #[arg(long, requires = "image")]
    atlas: Option<PathBuf>,
    /// Frame name within the atlas
    #[arg(long, requires = "atlas")]
    frame: Option<String>,
    /// Surface width
    #[arg(long, default_value = "256")]
    width: u32,
    /// Surface height
    #[arg(long, default_value = "256")]
    height: u32,
    /// Horizontal scroll in units per second
    #[arg(long, default_value = "30")]
    vx: f32,
    /// Vertical scroll in units per second
    #[arg(long, default_value = "0")]
    vy: f32,
    /// Uniform tile scale
    #[arg(long, default_value = "1")]
    tile_scale: f32,
    /// Ticks to simulate before rendering
    #[arg(long, default_value = "60")]
    frames: u32,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("tilesurface-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", tilesurface_common::crate_info());
            println!("assets: {}", tilesurface_assets::crate_info());
            println!("kernel: {}", tilesurface_kernel::crate_info());
            println!("render: {}", tilesurface_render::crate_info());
        }
        Commands::Render {
            scene: args,
            output,
            config,
            resolution,
            round_pixels,
        } => {
            let mut config = match config {
                Some(path) => RenderConfig::load(&path)
                    .with_context(|| format!("loading render config {}", path.display()))?,
                None => RenderConfig::default(),
            };
            if let Some(resolution) = resolution {
                config.resolution = resolution;
            }
            config.round_pixels |= round_pixels;

            let mut scene = build_scene(&args)?;
            let w = (args.width as f32 * config.resolution).ceil() as u32;
            let h = (args.height as f32 * config.resolution).ceil() as u32;
            let pixmap = CanvasRenderer::new(w, h, config).render(&mut scene)?;
            pixmap
                .save_png(&output)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("Wrote {}x{} frame at tick {} to {}", w, h, scene.tick(), output.display());
        }
        Commands::Gpu {
            scene: args,
            output,
        } => {
            let mut scene = build_scene(&args)?;
            let (device, queue) = pollster::block_on(tilesurface_render_wgpu::request_device())?;
            let target = OffscreenTarget::new(&device, args.width, args.height)?;
            let mut renderer = WgpuTilingRenderer::new(&device, OffscreenTarget::FORMAT);

            let batch = renderer.begin_frame(
                &device,
                &queue,
                target.view(),
                ScreenProjection::new(args.width, args.height, 1.0),
                Some([0, 0, 0, 0]),
            );
            let mut gpu = GpuRenderer::new(batch);
            gpu.render(&mut scene);
            let stats = gpu.into_batch().finish();
            println!(
                "GPU frame: quads={}, dropped={}, flushes={}, textures={}",
                stats.quads,
                stats.dropped,
                stats.flushes,
                renderer.texture_count()
            );

            if let Some(output) = output {
                let pixmap = target.read_pixels(&device, &queue)?;
                pixmap
                    .save_png(&output)
                    .with_context(|| format!("writing {}", output.display()))?;
                println!("Wrote {}", output.display());
            }
        }
        Commands::Inspect { scene: args } => {
            let mut scene = build_scene(&args)?;
            // Synthesize caches so the dump shows them.
            GpuRenderer::new(tilesurface_render::RecordingBatch::new()).render(&mut scene);
            print!("{}", DebugTextRenderer::new().render(&mut scene));
        }
    }

    Ok(())
}

/// One scrolling surface covering the target, stepped `args.frames` ticks.
fn build_scene(args: &SceneArgs) -> anyhow::Result<Scene> {
    let texture = load_texture(args)?;
    let mut surface = TileSurface::new(
        texture,
        0.0,
        0.0,
        args.width as f32,
        args.height as f32,
    );
    surface.set_tile_scale(args.tile_scale, args.tile_scale)?;
    surface.autoscroll(args.vx, args.vy);

    let mut scene = Scene::new();
    scene.add(surface);
    let ctx = TickContext::default();
    for _ in 0..args.frames {
        scene.step(&ctx);
    }
    scene.update_transforms();
    tracing::info!(tick = scene.tick(), surfaces = scene.len(), "scene ready");
    Ok(scene)
}

fn load_texture(args: &SceneArgs) -> anyhow::Result<Arc<Frame>> {
    let mut table = FrameTable::new();
    let Some(image) = &args.image else {
        return Ok(table.add_image("checker", SourceImage::loaded("checker", checker(30, 6)?)));
    };
    match &args.atlas {
        Some(atlas) => {
            table.load_atlas("sheet", image, atlas)?;
            Ok(table.frame("sheet", args.frame.as_deref())?)
        }
        None => Ok(table.load_png("image", image)?),
    }
}

/// Two-colour checkerboard of `size` pixels with `cell` pixel squares.
fn checker(size: u32, cell: u32) -> anyhow::Result<Pixmap> {
    let mut pixmap = Pixmap::new(size, size).context("checker size must be non-zero")?;
    let light = Color::from_rgba8(230, 200, 60, 255).premultiply().to_color_u8();
    let dark = Color::from_rgba8(40, 60, 120, 255).premultiply().to_color_u8();
    for (i, px) in pixmap.pixels_mut().iter_mut().enumerate() {
        let (x, y) = (i as u32 % size, i as u32 / size);
        *px = if (x / cell + y / cell) % 2 == 0 { light } else { dark };
    }
    Ok(pixmap)
}
