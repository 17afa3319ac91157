//! # vsurf
//!
//! Off-screen surface virtualization with an adaptive pixel-readback
//! pipeline.
//!
//! Applications render into what they believe are on-screen windows. vsurf
//! redirects that rendering into off-screen targets it owns, emulates
//! double and stereo buffering where the platform cannot, and reads the
//! finished frames back to host memory as fast as the driver allows.
//!
//! ## Architecture
//!
//! - `registry`: side tables for drawable and context metadata
//! - `binder`: scoped acquire/release of a (draw, read, context) binding
//! - `target`: off-screen storage, native pbuffer or emulated framebuffer
//! - `surface`: the per-window façade tying the pieces together
//! - `readback`: the staged/synchronous transfer state machine and profiler
//! - `platform`: the graphics seam, plus an in-memory implementation
//! - `runtime`: the process-level object that owns all shared state
//! - `config`: TOML configuration with environment overrides
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vsurf::{
//!     BufferMode, ConnectionId, DrawableId, FbConfig, HeadlessPlatform, PixelFormat, Rect,
//!     ReadbackRequest, Runtime, VirtualSurface, VsurfConfig,
//! };
//!
//! fn main() -> vsurf::Result<()> {
//!     let runtime = Runtime::new(Arc::new(HeadlessPlatform::new()), VsurfConfig::default());
//!     let surface = VirtualSurface::new(runtime, ConnectionId(1), DrawableId(0x200))?;
//!     surface.init(640, 480, &FbConfig::rgba8(1).with_double_buffer(true))?;
//!     surface.set_direct(true);
//!
//!     let request = ReadbackRequest::new(
//!         Rect::new(0, 0, 640, 480),
//!         640 * 4,
//!         BufferMode::Back,
//!         PixelFormat::Bgrx,
//!     );
//!     let mut frame = vec![0u8; 640 * 4 * 480];
//!     surface.read_pixels(&request, &mut frame)?;
//!     Ok(())
//! }
//! ```

pub mod autotest;
pub mod binder;
pub mod config;
pub mod error;
pub mod format;
pub mod handle;
pub mod logging;
pub mod platform;
pub mod readback;
pub mod registry;
pub mod runtime;
pub mod surface;
pub mod target;

// Re-export main types for easy access
pub use binder::{current_context_is_live, BindDrawable, ScopedBinding};
pub use config::{ReadbackMode, VsurfConfig};
pub use error::{Result, SurfaceError};
pub use format::{BufferMode, DataType, FbConfig, FbConfigId, LogicalBuffer, PixelFormat, Rect, TransferFormat};
pub use handle::{ConnectionId, ContextId, DrawableId, SurfaceHandle};
pub use platform::headless::HeadlessPlatform;
pub use platform::Platform;
pub use readback::{Phase, ReadbackEngine, TransferPath};
pub use registry::{ContextRegistry, DrawableRegistry};
pub use runtime::Runtime;
pub use surface::{ReadbackOutcome, ReadbackRequest, SkipReason, VirtualSurface};
pub use target::OffscreenTarget;

/// Version information for vsurf
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
