//! # vsurf - headless readback driver
//!
//! Drives one virtual surface on the in-memory platform: clears a frame,
//! swaps, reads it back, repeat. Useful for watching the adaptive readback
//! heuristic and the profiler without a GPU.

use anyhow::{bail, Result};
use clap::Parser;
use log::{debug, info, warn};
use std::sync::Arc;
use vsurf::platform::headless::{HeadlessPlatform, TransferTiming};
use vsurf::{
    BufferMode, ConnectionId, DrawableId, FbConfig, PixelFormat, Platform, ReadbackMode,
    ReadbackRequest, Rect, Runtime, VirtualSurface, VsurfConfig,
};

#[derive(Parser)]
#[command(name = "vsurf")]
#[command(about = "Drive a virtual off-screen surface through the adaptive readback pipeline")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/vsurf/vsurf.toml")]
    config: String,

    /// Enable debug logging and verbose readback notices
    #[arg(short, long)]
    debug: bool,

    /// Surface width in pixels
    #[arg(long, default_value_t = 800)]
    width: u32,

    /// Surface height in pixels
    #[arg(long, default_value_t = 600)]
    height: u32,

    /// Number of frames to read back
    #[arg(long, default_value_t = 30)]
    frames: u32,

    /// Pixel format requested by the transport (RGB, BGRX, XRGB, ...)
    #[arg(long, default_value = "BGRX")]
    format: String,

    /// Back the surface with renderbuffers instead of a multi-buffer pbuffer
    #[arg(long)]
    emulate: bool,

    /// Force synchronous readback
    #[arg(long)]
    sync: bool,

    /// Fraction of each staged transfer the simulated driver spends blocked
    /// in the pack call
    #[arg(long)]
    pack_ratio: Option<f64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    vsurf::logging::init(cli.debug);

    info!("Starting vsurf {}", vsurf::VERSION);
    debug!(
        "built {} for {}",
        env!("BUILD_DATE"),
        env!("TARGET_TRIPLE")
    );

    let config = match VsurfConfig::load(&cli.config) {
        Ok(config) => {
            info!("Configuration loaded from: {}", cli.config);
            config
        }
        Err(e) => {
            warn!("Failed to load configuration: {:#}", e);
            info!("Using default configuration");
            VsurfConfig::default()
        }
    };

    // Environment first, then CLI flags on top
    let mut config = config.apply_env()?;
    if cli.emulate {
        config.surface.emulate_multibuffer = true;
    }
    if cli.sync {
        config.readback.mode = ReadbackMode::Sync;
    }
    if cli.debug {
        config.diagnostics.verbose = true;
    }

    let pixel_format: PixelFormat = cli.format.parse()?;
    if cli.width == 0 || cli.height == 0 {
        bail!("Surface dimensions must be at least 1x1");
    }

    let platform = Arc::new(HeadlessPlatform::new());
    if let Some(ratio) = cli.pack_ratio {
        if !(0.0..=1.0).contains(&ratio) {
            bail!("--pack-ratio must be between 0 and 1");
        }
        platform.set_transfer_timing(TransferTiming::blocking(ratio));
    }

    let runtime = Runtime::new(platform.clone(), config);
    let connection = ConnectionId(1);
    let fb_config = FbConfig::rgba8(1).with_double_buffer(true).with_depth(24, 8);

    // Stand in for the application: its own context, bound to the surface
    let app_context = runtime.create_context(connection, &fb_config, true)?;
    let surface = VirtualSurface::new(runtime.clone(), connection, DrawableId(0x200))?;
    surface.init(cli.width, cli.height, &fb_config)?;
    surface.set_direct(true);

    let handle = surface.active_target_handle();
    if !platform.make_current(connection, handle, handle, Some(app_context)) {
        bail!("Could not bind application context to {}", handle);
    }
    surface.make_current(true, true)?;
    surface.clear();

    let pitch = (cli.width as usize * pixel_format.size()).div_ceil(4) * 4;
    let mut frame = vec![0u8; pitch * cli.height as usize];
    let request = ReadbackRequest::new(
        Rect::new(0, 0, cli.width, cli.height),
        pitch,
        BufferMode::Front,
        pixel_format,
    );

    for n in 0..cli.frames {
        let shade = (n % 256) as f32 / 255.0;
        platform.set_clear_color([shade, 0.25, 0.5, 1.0]);
        platform.clear();
        surface.swap_buffers()?;

        let outcome = surface.read_pixels(&request, &mut frame)?;
        debug!("frame {}: {:?}, phase {:?}", n, outcome, surface.readback_phase());
    }

    let stats = surface.readback_stats();
    info!(
        "{} frames of {}x{} {}: phase {:?}",
        cli.frames,
        cli.width,
        cli.height,
        pixel_format.name(),
        surface.readback_phase()
    );
    info!(
        "Readback: {:.2} Mpixels/sec, {:.2} frames/sec (simulated clock)",
        stats.mpixels_per_sec(),
        stats.frames_per_sec()
    );

    drop(surface);
    runtime.destroy_context(app_context);
    Ok(())
}
