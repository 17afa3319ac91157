//! Virtual surfaces
//!
//! A [`VirtualSurface`] stands in for one application window or pixmap. It
//! owns the off-screen target the application really renders into, a
//! private context used for readback and copies, and the adaptive readback
//! state.
//!
//! ## Locking
//!
//! Two locks, always taken in this order:
//! 1. `readback`: readback context, engine, staged buffer, profiler
//! 2. `state`: target, framebuffer config, direct mode, event mask
//!
//! The state lock is never held across a pixel transfer. The readback lock
//! is, so `init` and `set_direct` wait for a readback or copy in flight.
//! Registries are never called with either lock held: whether the caller's
//! context may be rebound afterwards is decided before `readback` is taken.

use crate::autotest::{is_uniform, pack_color, AutotestReport, Eye};
use crate::binder::{current_context_is_live, ScopedBinding};
use crate::config::ReadbackMode;
use crate::error::{Result, SurfaceError};
use crate::format::{
    bytes_per_pixel, BufferMode, DataType, FbConfig, FbConfigId, PixelFormat, Rect,
    TransferFormat,
};
use crate::handle::{BufferId, ConnectionId, ContextId, DrawableId, FramebufferId, SurfaceHandle};
use crate::logging::OnceNotice;
use crate::platform::{
    check_errors, drain_errors, pack_alignment_for, PackDestination, Platform, RenderMode,
    PIXEL_BUFFER_OBJECT_EXTENSION,
};
use crate::readback::profile::{Profiler, ReadbackStats};
use crate::readback::{demotion_notice, Phase, ReadbackEngine, TransferPath, Transition};
use crate::runtime::Runtime;
use crate::target::OffscreenTarget;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// One pixel readback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadbackRequest {
    pub rect: Rect,
    /// Bytes between the starts of consecutive rows in the destination
    pub pitch: usize,
    /// Buffer to read from
    pub buffer: BufferMode,
    /// Layout the transport wants
    pub pixel_format: PixelFormat,
    /// Explicit transfer format overriding the pixel-format table. The
    /// component type is then unsigned bytes.
    pub transfer: Option<TransferFormat>,
    /// One eye of a stereo pair
    pub stereo: bool,
}

impl ReadbackRequest {
    pub fn new(rect: Rect, pitch: usize, buffer: BufferMode, pixel_format: PixelFormat) -> Self {
        Self {
            rect,
            pitch,
            buffer,
            pixel_format,
            transfer: None,
            stereo: false,
        }
    }

    pub fn with_transfer(mut self, format: TransferFormat) -> Self {
        self.transfer = Some(format);
        self
    }

    pub fn with_stereo(mut self, stereo: bool) -> Self {
        self.stereo = stereo;
        self
    }

    /// Native transfer format and component type for this request
    pub fn transfer_format(&self) -> (TransferFormat, DataType) {
        match self.transfer {
            Some(format) => (format, DataType::UnsignedByte),
            None => self.pixel_format.transfer(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The application is in selection or feedback mode
    RenderMode,
    /// Readback is turned off in the configuration
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadbackOutcome {
    Completed(TransferPath),
    Skipped(SkipReason),
}

struct ReadbackState {
    context: Option<ContextId>,
    engine: ReadbackEngine,
    staged_buffer: Option<BufferId>,
    extension_checked: bool,
    render_mode_notice: OnceNotice,
    render_mode_warnings: u32,
    profiler: Profiler,
    autotest_frames: u64,
}

#[derive(Default)]
struct SurfaceState {
    target: Option<OffscreenTarget>,
    config: Option<FbConfig>,
    direct: Option<bool>,
    event_mask: u64,
}

impl SurfaceState {
    fn is_init(&self) -> bool {
        self.config.is_some() && self.direct.is_some()
    }
}

pub struct VirtualSurface {
    runtime: Arc<Runtime>,
    connection: ConnectionId,
    drawable: DrawableId,
    readback: Mutex<ReadbackState>,
    state: Mutex<SurfaceState>,
}

impl VirtualSurface {
    pub fn new(runtime: Arc<Runtime>, connection: ConnectionId, drawable: DrawableId) -> Result<Self> {
        if connection.is_null() {
            return Err(SurfaceError::InvalidArgument("null connection handle"));
        }
        if drawable.is_null() {
            return Err(SurfaceError::InvalidArgument("null drawable handle"));
        }
        let config = runtime.config();
        let interval = Duration::try_from_secs_f64(config.diagnostics.profile_interval_secs)
            .ok()
            .filter(|interval| !interval.is_zero())
            .ok_or(SurfaceError::InvalidArgument(
                "profile interval must be a positive number of seconds",
            ))?;
        let readback = ReadbackState {
            context: None,
            engine: ReadbackEngine::new(config.readback.mode),
            staged_buffer: None,
            extension_checked: false,
            render_mode_notice: OnceNotice::new(),
            render_mode_warnings: 0,
            profiler: Profiler::new("Readback", config.diagnostics.profile, interval),
            autotest_frames: 0,
        };
        Ok(Self {
            runtime,
            connection,
            drawable,
            readback: Mutex::new(readback),
            state: Mutex::new(SurfaceState::default()),
        })
    }

    fn platform(&self) -> &dyn Platform {
        self.runtime.platform()
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn drawable(&self) -> DrawableId {
        self.drawable
    }

    /// Make sure the target has the given size and config. Returns false
    /// when it already did, true when the target was recreated.
    pub fn init(&self, width: u32, height: u32, config: &FbConfig) -> Result<bool> {
        if config.id.is_null() {
            return Err(SurfaceError::InvalidArgument("null framebuffer config"));
        }
        if width < 1 || height < 1 {
            return Err(SurfaceError::InvalidArgument(
                "surface dimensions must be at least 1x1",
            ));
        }

        let mut readback = self.readback.lock();
        let mut state = self.state.lock();
        if let Some(target) = &state.target {
            if target.width() == width && target.height() == height && target.config().id == config.id {
                return Ok(false);
            }
        }

        let emulate = self.runtime.config().surface.emulate_multibuffer;
        let target = OffscreenTarget::new(
            self.runtime.shared_platform(),
            self.connection,
            width,
            height,
            config,
            emulate,
        )?;
        // Old target goes away here
        state.target = Some(target);

        let config_changed = state.config.as_ref().map(|c| c.id != config.id).unwrap_or(false);
        if config_changed {
            self.destroy_readback_context(&mut readback);
        }
        state.config = Some(config.clone());
        debug!(
            "surface {} on {}: {}x{} config {}",
            self.drawable, self.connection, width, height, config.id
        );
        Ok(true)
    }

    /// Record whether the application renders directly. A change drops the
    /// readback context so it gets recreated in the new mode.
    pub fn set_direct(&self, direct: bool) {
        let mut readback = self.readback.lock();
        let mut state = self.state.lock();
        if state.direct.is_some_and(|d| d != direct) {
            self.destroy_readback_context(&mut readback);
        }
        state.direct = Some(direct);
    }

    /// Config and direct mode are both known
    pub fn is_init(&self) -> bool {
        self.state.lock().is_init()
    }

    fn destroy_readback_context(&self, readback: &mut ReadbackState) {
        if let Some(ctx) = readback.context.take() {
            debug!("destroying readback context {} of surface {}", ctx, self.drawable);
            self.platform().destroy_context(ctx);
            // Buffer objects went with the context
            readback.staged_buffer = None;
            readback.extension_checked = false;
        }
    }

    /// Clear the target once, on the context current on this thread
    pub fn clear(&self) {
        if let Some(target) = self.state.lock().target.as_mut() {
            target.clear();
        }
    }

    pub fn swap_buffers(&self) -> Result<()> {
        match self.state.lock().target.as_mut() {
            Some(target) => target.swap(),
            None => Ok(()),
        }
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.state
            .lock()
            .target
            .as_ref()
            .map(|t| (t.width(), t.height()))
    }

    /// The pbuffer to bind, or the null handle before `init`
    pub fn active_target_handle(&self) -> SurfaceHandle {
        self.state
            .lock()
            .target
            .as_ref()
            .map(|t| t.surface())
            .unwrap_or(SurfaceHandle::NULL)
    }

    /// Config id of the current target, null before `init`
    pub fn format_id(&self) -> FbConfigId {
        self.state
            .lock()
            .target
            .as_ref()
            .map(|t| t.config().id)
            .unwrap_or_default()
    }

    /// Native transfer format of the current target
    pub fn native_format(&self) -> Option<TransferFormat> {
        self.state.lock().target.as_ref().map(|t| t.format())
    }

    /// Framebuffer object of an emulated target
    pub fn framebuffer(&self) -> Option<FramebufferId> {
        self.state.lock().target.as_ref().and_then(|t| t.framebuffer())
    }

    /// Bind the emulated framebuffer on the current context
    pub fn make_current(&self, draw: bool, read: bool) -> Result<()> {
        match self.state.lock().target.as_mut() {
            Some(target) => target.make_current(draw, read),
            None => Ok(()),
        }
    }

    pub fn drawing_to_front(&self) -> bool {
        self.state
            .lock()
            .target
            .as_ref()
            .map(|t| t.drawing_to_front())
            .unwrap_or(false)
    }

    pub fn drawing_to_right(&self) -> bool {
        self.state
            .lock()
            .target
            .as_ref()
            .map(|t| t.drawing_to_right())
            .unwrap_or(false)
    }

    pub fn set_draw_buffer(&self, mode: BufferMode) {
        if let Some(target) = self.state.lock().target.as_ref() {
            target.set_draw_buffer(mode);
        }
    }

    pub fn set_read_buffer(&self, mode: BufferMode) {
        if let Some(target) = self.state.lock().target.as_ref() {
            target.set_read_buffer(mode);
        }
    }

    pub fn event_mask(&self) -> u64 {
        self.state.lock().event_mask
    }

    pub fn set_event_mask(&self, mask: u64) {
        self.state.lock().event_mask = mask;
    }

    pub fn readback_phase(&self) -> Phase {
        self.readback.lock().engine.phase()
    }

    pub fn readback_stats(&self) -> ReadbackStats {
        self.readback.lock().profiler.totals()
    }

    /// Render-mode skip warnings logged so far. At most one per surface.
    pub fn render_mode_warnings(&self) -> u32 {
        self.readback.lock().render_mode_warnings
    }

    /// Lazily create the readback context. Fails before `init` and
    /// `set_direct` have both happened.
    fn ensure_context(&self, readback: &mut ReadbackState) -> Result<(ContextId, FbConfig, SurfaceHandle)> {
        let state = self.state.lock();
        let (Some(config), Some(direct)) = (state.config.clone(), state.direct) else {
            return Err(SurfaceError::NotInitialized);
        };
        let surface = state
            .target
            .as_ref()
            .map(|t| t.surface())
            .ok_or(SurfaceError::NotInitialized)?;
        drop(state);

        let ctx = match readback.context {
            Some(ctx) => ctx,
            None => {
                let ctx = self
                    .platform()
                    .create_context(self.connection, &config, direct)
                    .ok_or_else(|| {
                        SurfaceError::Platform("could not create context for readback".into())
                    })?;
                debug!("readback context {} for surface {}", ctx, self.drawable);
                readback.context = Some(ctx);
                ctx
            }
        };
        Ok((ctx, config, surface))
    }

    /// Select the read buffer on the temporary context, binding an emulated
    /// framebuffer for reading first
    fn prepare_read(&self, buffer: BufferMode) -> Result<()> {
        let mut state = self.state.lock();
        let target = state.target.as_mut().ok_or(SurfaceError::NotInitialized)?;
        target.bind_for_read()?;
        target.set_read_buffer(buffer);
        Ok(())
    }

    /// Read pixels from the virtual surface into `dest`.
    ///
    /// `dest` must hold `pitch * height` bytes. Staged or synchronous
    /// transfer is chosen by the readback engine.
    pub fn read_pixels(&self, request: &ReadbackRequest, dest: &mut [u8]) -> Result<ReadbackOutcome> {
        let (format, ty) = request.transfer_format();
        let rect = request.rect;
        if rect.is_empty() {
            return Err(SurfaceError::InvalidArgument("empty readback region"));
        }
        let bpp = bytes_per_pixel(format, ty);
        if request.pitch < rect.width as usize * bpp {
            return Err(SurfaceError::InvalidArgument("pitch is smaller than one row"));
        }
        let size = request
            .pitch
            .checked_mul(rect.height as usize)
            .ok_or(SurfaceError::InvalidArgument("pitch * height overflows"))?;
        if dest.len() < size {
            return Err(SurfaceError::InvalidArgument(
                "destination is smaller than pitch * height",
            ));
        }

        if !self.is_init() {
            return Err(SurfaceError::NotInitialized);
        }

        let platform = self.platform();
        let restore_previous = current_context_is_live(platform, self.runtime.contexts());
        let mut guard = self.readback.lock();
        let readback = &mut *guard;
        if readback.engine.mode() == ReadbackMode::None {
            return Ok(ReadbackOutcome::Skipped(SkipReason::Disabled));
        }
        readback.engine.observe_format(format);

        let diagnostics = &self.runtime.config().diagnostics;
        if platform.render_mode() != RenderMode::Render {
            if diagnostics.verbose && readback.render_mode_notice.fire() {
                readback.render_mode_warnings += 1;
                warn!("One or more readbacks skipped because render mode is not RENDER");
            }
            return Ok(ReadbackOutcome::Skipped(SkipReason::RenderMode));
        }

        let (ctx, config, surface) = self.ensure_context(readback)?;
        let binding = ScopedBinding::acquire_with_restore(
            platform,
            self.connection,
            surface.into(),
            surface.into(),
            Some(ctx),
            Some(&config),
            restore_previous,
        )?;

        self.prepare_read(request.buffer)?;
        let native = self.native_format().unwrap_or(format);
        platform.set_pack_alignment(pack_alignment_for(request.pitch));

        let path = readback.engine.path().unwrap_or(TransferPath::Synchronous);
        if path == TransferPath::Staged {
            if !readback.extension_checked {
                if !platform.has_extension(PIXEL_BUFFER_OBJECT_EXTENSION) {
                    return Err(SurfaceError::Capability(format!(
                        "{} extension not available",
                        PIXEL_BUFFER_OBJECT_EXTENSION
                    )));
                }
                readback.extension_checked = true;
            }
            let buffer = match readback.staged_buffer {
                Some(buffer) => buffer,
                None => {
                    let buffer = platform.create_buffer().ok_or_else(|| {
                        SurfaceError::Platform("could not generate pixel buffer object".into())
                    })?;
                    readback.staged_buffer = Some(buffer);
                    buffer
                }
            };
            if diagnostics.verbose && readback.engine.should_announce_path() {
                info!("Using pixel buffer objects for readback ({} --> {})", native, format);
            }
            platform.bind_pack_buffer(Some(buffer));
            if platform.pack_buffer_size() != size {
                platform.pack_buffer_storage(size);
            }
            if platform.pack_buffer_size() != size {
                return Err(SurfaceError::Platform("could not set pixel buffer object size".into()));
            }
        } else if diagnostics.verbose && readback.engine.should_announce_path() {
            info!("Using synchronous readback ({} --> {})", native, format);
        }

        drain_errors(platform);
        readback.profiler.start_frame(platform.timestamp());
        match path {
            TransferPath::Staged => {
                let t0 = platform.timestamp();
                platform.read_pixels(rect, format, ty, PackDestination::PackBuffer);
                let pack = platform.timestamp().saturating_sub(t0);
                platform.read_pack_buffer(&mut dest[..size])?;
                platform.bind_pack_buffer(None);
                let total = platform.timestamp().saturating_sub(t0);

                if readback.engine.record_staged(pack, total) == Some(Transition::Demoted) {
                    debug!("staged readback demoted for {} on surface {}", format, self.drawable);
                    if diagnostics.verbose && readback.engine.should_report_demotion() {
                        for line in demotion_notice(native, format, self.runtime.config().readback.force_alpha) {
                            info!("{}", line);
                        }
                    }
                }
            }
            TransferPath::Synchronous => {
                platform.read_pixels(rect, format, ty, PackDestination::Host(&mut *dest));
            }
        }
        let weight = if request.stereo { 0.5 } else { 1.0 };
        readback.profiler.end_frame(
            platform.timestamp(),
            rect.width as u64 * rect.height as u64,
            weight,
        );
        check_errors(platform, "read pixels")?;

        let report = if diagnostics.autotest {
            Some(self.autotest_report(readback, request, bpp, dest))
        } else {
            None
        };

        drop(binding);
        drop(guard);
        if let Some((eye, report)) = report {
            self.runtime.autotest().publish(eye, report);
        }
        Ok(ReadbackOutcome::Completed(path))
    }

    /// Runs with the readback context still bound and no pack buffer
    fn autotest_report(
        &self,
        readback: &mut ReadbackState,
        request: &ReadbackRequest,
        bpp: usize,
        dest: &[u8],
    ) -> (Eye, AutotestReport) {
        let eye = if request.buffer.is_right_eye_read() {
            Eye::Right
        } else {
            readback.autotest_frames += 1;
            Eye::Left
        };
        let rect = request.rect;
        let color = if is_uniform(dest, rect.width as usize, rect.height as usize, request.pitch, bpp) {
            let mut rgb = [0u8; 3];
            let platform = self.platform();
            platform.read_pixels(
                Rect::new(0, 0, 1, 1),
                TransferFormat::Rgb,
                DataType::UnsignedByte,
                PackDestination::Host(&mut rgb),
            );
            Some(pack_color(rgb))
        } else {
            None
        };
        (
            eye,
            AutotestReport {
                color,
                frame: readback.autotest_frames,
                connection: self.connection,
                drawable: self.drawable,
            },
        )
    }

    /// Copy a region of this surface's front buffer into `target`.
    ///
    /// Rows are addressed from the top of the region, so row `i` of the
    /// source lands on row `i` of the destination with the Y axis flipped
    /// into bottom-left coordinates.
    pub fn copy_pixels(&self, src: Rect, dst_x: i32, dst_y: i32, target: SurfaceHandle) -> Result<()> {
        if target.is_null() {
            return Err(SurfaceError::InvalidArgument("null copy target"));
        }
        let restore_previous = current_context_is_live(self.platform(), self.runtime.contexts());
        let mut readback = self.readback.lock();
        let (ctx, config, surface) = self.ensure_context(&mut readback)?;
        let binding = ScopedBinding::acquire_with_restore(
            self.platform(),
            self.connection,
            target.into(),
            surface.into(),
            Some(ctx),
            Some(&config),
            restore_previous,
        )?;

        self.prepare_read(BufferMode::Front)?;
        self.set_draw_buffer(BufferMode::FrontAndBack);

        let platform = self.platform();
        platform.set_unpack_alignment(1);
        platform.set_pack_alignment(1);
        drain_errors(platform);

        let (width, height) = (src.width, src.height as i32);
        platform.viewport(Rect::new(0, 0, width, src.height));
        platform.push_ortho(width, src.height);
        for i in 0..height {
            platform.raster_pos(dst_x, height - dst_y - i - 1);
            platform.copy_pixels(Rect::new(src.x, height - src.y - i - 1, width, 1));
        }
        let result = check_errors(platform, "copy pixels");
        platform.pop_ortho();

        drop(binding);
        result
    }
}

impl Drop for VirtualSurface {
    fn drop(&mut self) {
        let mut readback = self.readback.lock();
        let mut state = self.state.lock();
        state.target = None;
        if let Some(ctx) = readback.context.take() {
            self.runtime.platform().destroy_context(ctx);
        }
    }
}

impl std::fmt::Debug for VirtualSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualSurface")
            .field("connection", &self.connection)
            .field("drawable", &self.drawable)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VsurfConfig;
    use crate::platform::headless::HeadlessPlatform;
    use proptest::prelude::*;

    const CONN: ConnectionId = ConnectionId(1);

    fn setup(config: VsurfConfig) -> (Arc<HeadlessPlatform>, VirtualSurface) {
        let platform = Arc::new(HeadlessPlatform::new());
        let runtime = Runtime::new(platform.clone(), config);
        let surface = VirtualSurface::new(runtime, CONN, DrawableId(0x42)).unwrap();
        (platform, surface)
    }

    #[test]
    fn new_rejects_null_handles() {
        let runtime = Runtime::new(Arc::new(HeadlessPlatform::new()), VsurfConfig::default());
        assert!(VirtualSurface::new(runtime.clone(), ConnectionId::NULL, DrawableId(1)).is_err());
        assert!(VirtualSurface::new(runtime, CONN, DrawableId::NULL).is_err());
    }

    #[test]
    fn new_rejects_unusable_profile_interval() {
        for interval in [-1.0, 0.0, f64::NAN, f64::INFINITY] {
            let mut config = VsurfConfig::default();
            config.diagnostics.profile_interval_secs = interval;
            let runtime = Runtime::new(Arc::new(HeadlessPlatform::new()), config);
            assert!(matches!(
                VirtualSurface::new(runtime, CONN, DrawableId(0x42)),
                Err(SurfaceError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn oversized_init_fails_without_touching_state() {
        let (platform, surface) = setup(VsurfConfig::default());
        let err = surface.init(70000, 70000, &FbConfig::rgba8(1)).unwrap_err();
        assert!(matches!(err, SurfaceError::Platform(_)));
        assert!(surface.active_target_handle().is_null());
        assert_eq!(surface.dimensions(), None);
        assert!(platform.calls().pbuffers_created.is_empty());
    }

    #[test]
    fn oversized_emulated_target_fails_to_bind() {
        let mut config = VsurfConfig::default();
        config.surface.emulate_multibuffer = true;
        let (platform, surface) = setup(config);
        let fb_config = FbConfig::rgba8(1);
        surface.init(70000, 70000, &fb_config).unwrap();

        let handle = surface.active_target_handle();
        let app = platform.create_context(CONN, &fb_config, true).unwrap();
        assert!(platform.make_current(CONN, handle, handle, Some(app)));
        assert!(matches!(
            surface.make_current(true, true),
            Err(SurfaceError::Driver { .. })
        ));
    }

    #[test]
    fn init_reports_changes() {
        let (platform, surface) = setup(VsurfConfig::default());
        let config = FbConfig::rgba8(1);
        assert!(surface.init(64, 32, &config).unwrap());
        let handle = surface.active_target_handle();
        assert!(!surface.init(64, 32, &config).unwrap());
        assert_eq!(surface.active_target_handle(), handle);

        assert!(surface.init(65, 32, &config).unwrap());
        assert_ne!(surface.active_target_handle(), handle);
        assert!(!platform.surface_exists(handle));
        assert_eq!(surface.dimensions(), Some((65, 32)));
    }

    #[test]
    fn init_validates_arguments() {
        let (_, surface) = setup(VsurfConfig::default());
        assert!(surface.init(0, 1, &FbConfig::rgba8(1)).unwrap_err().is_contract_violation());
        assert!(surface.init(1, 1, &FbConfig::rgba8(0)).unwrap_err().is_contract_violation());
        assert_eq!(surface.format_id(), FbConfigId::default());
        assert!(surface.active_target_handle().is_null());
    }

    #[test]
    fn readback_before_init_is_a_contract_violation() {
        let (_, surface) = setup(VsurfConfig::default());
        let mut dest = vec![0u8; 16];
        let request = ReadbackRequest::new(Rect::new(0, 0, 2, 2), 8, BufferMode::Front, PixelFormat::Bgrx);
        assert_eq!(surface.read_pixels(&request, &mut dest), Err(SurfaceError::NotInitialized));

        // A format alone is not enough: the direct mode is still unknown
        surface.init(2, 2, &FbConfig::rgba8(1)).unwrap();
        assert!(!surface.is_init());
        assert_eq!(surface.read_pixels(&request, &mut dest), Err(SurfaceError::NotInitialized));
        assert_eq!(
            surface.copy_pixels(Rect::new(0, 0, 1, 1), 0, 0, SurfaceHandle(9)),
            Err(SurfaceError::NotInitialized)
        );
    }

    #[test]
    fn config_change_drops_readback_context() {
        let (platform, surface) = setup(VsurfConfig::default());
        surface.init(4, 4, &FbConfig::rgba8(1)).unwrap();
        surface.set_direct(true);
        let mut dest = vec![0u8; 64];
        let request = ReadbackRequest::new(Rect::new(0, 0, 4, 4), 16, BufferMode::Front, PixelFormat::Bgrx);
        surface.read_pixels(&request, &mut dest).unwrap();
        assert_eq!(platform.calls().contexts_created, 1);

        // Same config id, new size: context survives
        surface.init(8, 8, &FbConfig::rgba8(1)).unwrap();
        assert!(platform.calls().contexts_destroyed.is_empty());

        surface.init(8, 8, &FbConfig::rgba8(2)).unwrap();
        assert_eq!(platform.calls().contexts_destroyed.len(), 1);
    }

    #[test]
    fn direct_mode_change_drops_readback_context() {
        let (platform, surface) = setup(VsurfConfig::default());
        surface.init(4, 4, &FbConfig::rgba8(1)).unwrap();
        surface.set_direct(true);
        let mut dest = vec![0u8; 64];
        let request = ReadbackRequest::new(Rect::new(0, 0, 4, 4), 16, BufferMode::Front, PixelFormat::Bgrx);
        surface.read_pixels(&request, &mut dest).unwrap();

        surface.set_direct(true);
        assert!(platform.calls().contexts_destroyed.is_empty());
        surface.set_direct(false);
        assert_eq!(platform.calls().contexts_destroyed.len(), 1);
    }

    #[test]
    fn disabled_readback_skips() {
        let mut config = VsurfConfig::default();
        config.readback.mode = ReadbackMode::None;
        let (platform, surface) = setup(config);
        surface.init(2, 2, &FbConfig::rgba8(1)).unwrap();
        surface.set_direct(true);
        let mut dest = vec![0u8; 16];
        let request = ReadbackRequest::new(Rect::new(0, 0, 2, 2), 8, BufferMode::Front, PixelFormat::Bgrx);
        assert_eq!(
            surface.read_pixels(&request, &mut dest),
            Ok(ReadbackOutcome::Skipped(SkipReason::Disabled))
        );
        assert_eq!(platform.calls().contexts_created, 0);
    }

    #[test]
    fn disabled_readback_before_init_is_a_contract_violation() {
        let mut config = VsurfConfig::default();
        config.readback.mode = ReadbackMode::None;
        let (_, surface) = setup(config);
        let mut dest = vec![0u8; 16];
        let request = ReadbackRequest::new(Rect::new(0, 0, 2, 2), 8, BufferMode::Front, PixelFormat::Bgrx);
        assert_eq!(
            surface.read_pixels(&request, &mut dest),
            Err(SurfaceError::NotInitialized)
        );

        surface.init(2, 2, &FbConfig::rgba8(1)).unwrap();
        assert_eq!(
            surface.read_pixels(&request, &mut dest),
            Err(SurfaceError::NotInitialized)
        );
        surface.set_direct(false);
        assert_eq!(
            surface.read_pixels(&request, &mut dest),
            Ok(ReadbackOutcome::Skipped(SkipReason::Disabled))
        );
    }

    #[test]
    fn short_destination_is_rejected() {
        let (_, surface) = setup(VsurfConfig::default());
        let mut dest = vec![0u8; 15];
        let request = ReadbackRequest::new(Rect::new(0, 0, 2, 2), 8, BufferMode::Front, PixelFormat::Bgrx);
        assert!(matches!(
            surface.read_pixels(&request, &mut dest),
            Err(SurfaceError::InvalidArgument(_))
        ));
    }

    #[test]
    fn event_mask_is_per_surface() {
        let (_, surface) = setup(VsurfConfig::default());
        assert_eq!(surface.event_mask(), 0);
        surface.set_event_mask(0x4000);
        assert_eq!(surface.event_mask(), 0x4000);
    }

    #[test]
    fn drop_releases_target_and_context() {
        let (platform, surface) = setup(VsurfConfig::default());
        surface.init(4, 4, &FbConfig::rgba8(1)).unwrap();
        surface.set_direct(true);
        let handle = surface.active_target_handle();
        let mut dest = vec![0u8; 64];
        let request = ReadbackRequest::new(Rect::new(0, 0, 4, 4), 16, BufferMode::Front, PixelFormat::Bgrx);
        surface.read_pixels(&request, &mut dest).unwrap();

        drop(surface);
        assert!(!platform.surface_exists(handle));
        assert_eq!(platform.context_count(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn init_is_idempotent(
            width in 1u32..256,
            height in 1u32..256,
            id in 1u32..8,
            db in any::<bool>(),
            emulate in any::<bool>(),
        ) {
            let mut config = VsurfConfig::default();
            config.surface.emulate_multibuffer = emulate;
            let (platform, surface) = setup(config);
            let fb = FbConfig::rgba8(id).with_double_buffer(db);

            prop_assert!(surface.init(width, height, &fb).unwrap());
            let handle = surface.active_target_handle();
            let created = platform.calls().pbuffers_created.len();

            prop_assert!(!surface.init(width, height, &fb).unwrap());
            prop_assert_eq!(surface.active_target_handle(), handle);
            prop_assert_eq!(platform.calls().pbuffers_created.len(), created);
            prop_assert_eq!(platform.calls().pbuffers_destroyed, 0);
        }
    }
}
