//! Off-screen render target
//!
//! An [`OffscreenTarget`] owns the GPU storage behind one virtual surface.
//! Storage comes in two flavors, chosen once at construction:
//!
//! - [`Storage::NativeSurface`]: a pbuffer with as many color buffers as the
//!   framebuffer config asks for. Swaps and buffer selection go straight to
//!   the platform.
//! - [`Storage::EmulatedFramebuffer`]: a 1x1 pbuffer that only anchors the
//!   context, plus a framebuffer object with one color renderbuffer per
//!   enabled logical buffer and an optional depth renderbuffer. Swapping
//!   relabels the front and back renderbuffers instead of copying pixels.
//!
//! Logical buffer `i` maps to color attachment `i` in emulated mode
//! (0 front-left, 1 back-left, 2 front-right, 3 back-right).
//!
//! Every method operates on whatever context is current on the calling
//! thread.

use crate::error::{Result, SurfaceError};
use crate::format::{BufferMode, FbConfig, LogicalBuffer, TransferFormat};
use crate::handle::{ConnectionId, FramebufferId, RenderbufferId, SurfaceHandle};
use crate::platform::{
    check_errors, AttachmentPoint, DrawBufferState, FramebufferTarget, Platform,
};
use log::{debug, trace};
use std::sync::Arc;

/// Renderbuffers standing in for a multi-buffer pbuffer
#[derive(Debug, Default)]
pub struct EmulatedBuffers {
    framebuffer: Option<FramebufferId>,
    color: [Option<RenderbufferId>; 4],
    depth: Option<RenderbufferId>,
}

#[derive(Debug)]
pub enum Storage {
    NativeSurface,
    EmulatedFramebuffer(EmulatedBuffers),
}

pub struct OffscreenTarget {
    platform: Arc<dyn Platform>,
    width: u32,
    height: u32,
    config: FbConfig,
    surface: SurfaceHandle,
    storage: Storage,
    cleared: bool,
    format: TransferFormat,
}

/// Native transfer layout for a config: 32-bit pixels carry alpha, and
/// little-endian hosts get blue-first channel order
pub fn native_transfer_format(config: &FbConfig) -> TransferFormat {
    let little_endian = cfg!(target_endian = "little");
    match (config.pixel_size() == 32, little_endian) {
        (true, true) => TransferFormat::Bgra,
        (true, false) => TransferFormat::Rgba,
        (false, true) => TransferFormat::Bgr,
        (false, false) => TransferFormat::Rgb,
    }
}

impl OffscreenTarget {
    pub fn new(
        platform: Arc<dyn Platform>,
        connection: ConnectionId,
        width: u32,
        height: u32,
        config: &FbConfig,
        emulate: bool,
    ) -> Result<Self> {
        if config.id.is_null() {
            return Err(SurfaceError::InvalidArgument("null framebuffer config"));
        }
        if width < 1 || height < 1 {
            return Err(SurfaceError::InvalidArgument(
                "surface dimensions must be at least 1x1",
            ));
        }

        // In emulated mode the pbuffer only anchors the context
        let (pb_width, pb_height) = if emulate { (1, 1) } else { (width, height) };
        let surface = platform.create_pbuffer(connection, config, pb_width, pb_height)?;

        let storage = if emulate {
            Storage::EmulatedFramebuffer(EmulatedBuffers::default())
        } else {
            Storage::NativeSurface
        };
        let format = native_transfer_format(config);
        debug!(
            "off-screen target {} {}x{} config {} ({}, {})",
            surface,
            width,
            height,
            config.id,
            format,
            if emulate { "emulated" } else { "native" }
        );

        Ok(Self {
            platform,
            width,
            height,
            config: config.clone(),
            surface,
            storage,
            cleared: false,
            format,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn config(&self) -> &FbConfig {
        &self.config
    }

    /// The pbuffer contexts get bound to
    pub fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    /// Native transfer format of the color buffers
    pub fn format(&self) -> TransferFormat {
        self.format
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn is_emulated(&self) -> bool {
        matches!(self.storage, Storage::EmulatedFramebuffer(_))
    }

    pub fn is_cleared(&self) -> bool {
        self.cleared
    }

    pub fn framebuffer(&self) -> Option<FramebufferId> {
        match &self.storage {
            Storage::EmulatedFramebuffer(buffers) => buffers.framebuffer,
            Storage::NativeSurface => None,
        }
    }

    pub fn color_buffer(&self, buffer: LogicalBuffer) -> Option<RenderbufferId> {
        match &self.storage {
            Storage::EmulatedFramebuffer(buffers) => buffers.color[buffer.index()],
            Storage::NativeSurface => None,
        }
    }

    pub fn depth_buffer(&self) -> Option<RenderbufferId> {
        match &self.storage {
            Storage::EmulatedFramebuffer(buffers) => buffers.depth,
            Storage::NativeSurface => None,
        }
    }

    /// Allocate the framebuffer object and its renderbuffers if needed, and
    /// (re)attach them. Previous framebuffer bindings are restored.
    pub fn create_buffers(&mut self) -> Result<()> {
        let platform = Arc::clone(&self.platform);
        let (width, height, config) = (self.width, self.height, &self.config);
        let Storage::EmulatedFramebuffer(buffers) = &mut self.storage else {
            return Ok(());
        };

        let needed = config.logical_buffer_count();
        let max = platform.max_color_attachments();
        if needed > max {
            return Err(SurfaceError::Capability(format!(
                "{} color buffers exceed the limit of {} color attachments",
                needed, max
            )));
        }

        let old_read = platform.framebuffer_binding(FramebufferTarget::Read);
        let old_draw = platform.framebuffer_binding(FramebufferTarget::Draw);

        let fbo = *buffers
            .framebuffer
            .get_or_insert_with(|| platform.create_framebuffer());
        platform.bind_framebuffer(FramebufferTarget::Both, Some(fbo));
        check_errors(platform.as_ref(), "bind framebuffer")?;

        let samples = if config.samples > 1 { config.samples as u32 } else { 0 };
        for buffer in config.enabled_buffers() {
            let index = buffer.index();
            let rb = match buffers.color[index] {
                Some(rb) => rb,
                None => {
                    let rb = platform.create_renderbuffer();
                    platform.renderbuffer_storage(rb, config.color_storage(), samples, width, height);
                    check_errors(platform.as_ref(), "allocate color renderbuffer storage")?;
                    buffers.color[index] = Some(rb);
                    rb
                }
            };
            platform.attach_renderbuffer(AttachmentPoint::Color(index as u32), Some(rb));
            check_errors(platform.as_ref(), "attach color renderbuffer")?;
        }

        if let Some(depth_format) = config.depth_storage() {
            let rb = match buffers.depth {
                Some(rb) => rb,
                None => {
                    let rb = platform.create_renderbuffer();
                    platform.renderbuffer_storage(rb, depth_format, samples, width, height);
                    check_errors(platform.as_ref(), "allocate depth renderbuffer storage")?;
                    buffers.depth = Some(rb);
                    rb
                }
            };
            let point = if config.stencil_size > 0 {
                AttachmentPoint::DepthStencil
            } else {
                AttachmentPoint::Depth
            };
            platform.attach_renderbuffer(point, Some(rb));
            check_errors(platform.as_ref(), "attach depth renderbuffer")?;
        }

        if !platform.framebuffer_complete() {
            return Err(SurfaceError::Capability(
                "framebuffer object is not complete".into(),
            ));
        }

        platform.bind_framebuffer(FramebufferTarget::Read, old_read);
        platform.bind_framebuffer(FramebufferTarget::Draw, old_draw);
        check_errors(platform.as_ref(), "restore framebuffer bindings")
    }

    /// Clear the color buffers to transparent black, once per target.
    /// The application's clear color is left as it was.
    pub fn clear(&mut self) {
        if self.cleared {
            return;
        }
        self.cleared = true;
        let saved = self.platform.clear_color();
        self.platform.set_clear_color([0.0; 4]);
        self.platform.clear();
        self.platform.set_clear_color(saved);
    }

    pub fn swap(&mut self) -> Result<()> {
        let platform = Arc::clone(&self.platform);
        let buffers = match &mut self.storage {
            Storage::NativeSurface => {
                platform.swap_buffers(self.surface);
                return Ok(());
            }
            Storage::EmulatedFramebuffer(buffers) => buffers,
        };
        let Some(fbo) = buffers.framebuffer else {
            return Ok(());
        };

        if buffers.color[0].is_some() && buffers.color[1].is_some() {
            buffers.color.swap(0, 1);
        }
        if buffers.color[2].is_some() && buffers.color[3].is_some() {
            buffers.color.swap(2, 3);
        }
        trace!("swapped renderbuffers of framebuffer {}", fbo);

        let old_read = platform.framebuffer_binding(FramebufferTarget::Read);
        let old_draw = platform.framebuffer_binding(FramebufferTarget::Draw);
        platform.bind_framebuffer(FramebufferTarget::Both, Some(fbo));
        check_errors(platform.as_ref(), "bind framebuffer")?;

        for buffer in self.config.enabled_buffers() {
            let index = buffer.index();
            platform.attach_renderbuffer(AttachmentPoint::Color(index as u32), buffers.color[index]);
            check_errors(platform.as_ref(), "attach color renderbuffer")?;
        }
        if !platform.framebuffer_complete() {
            return Err(SurfaceError::Capability(
                "framebuffer object is not complete".into(),
            ));
        }

        platform.bind_framebuffer(FramebufferTarget::Read, old_read);
        platform.bind_framebuffer(FramebufferTarget::Draw, old_draw);
        Ok(())
    }

    /// Bind the framebuffer object for the requested roles, recreating it
    /// first. Selects the back buffer when there is one. Native targets
    /// need nothing here.
    pub fn make_current(&mut self, draw: bool, read: bool) -> Result<()> {
        if !self.is_emulated() || !(draw || read) {
            return Ok(());
        }
        if let Storage::EmulatedFramebuffer(buffers) = &mut self.storage {
            if let Some(fbo) = buffers.framebuffer.take() {
                self.platform.delete_framebuffer(fbo);
            }
        }
        self.create_buffers()?;
        let fbo = self.framebuffer();
        let mode = self.default_mode();

        if draw {
            self.platform.bind_framebuffer(FramebufferTarget::Draw, fbo);
            check_errors(self.platform.as_ref(), "bind draw framebuffer")?;
            self.set_draw_buffer(mode);
        }
        if read {
            self.platform.bind_framebuffer(FramebufferTarget::Read, fbo);
            check_errors(self.platform.as_ref(), "bind read framebuffer")?;
            self.set_read_buffer(mode);
        }
        Ok(())
    }

    /// Bind the framebuffer object for reading without recreating it, so
    /// other contexts that have it bound keep a valid binding
    pub fn bind_for_read(&mut self) -> Result<()> {
        if !self.is_emulated() {
            return Ok(());
        }
        self.create_buffers()?;
        self.platform
            .bind_framebuffer(FramebufferTarget::Read, self.framebuffer());
        check_errors(self.platform.as_ref(), "bind read framebuffer")?;
        self.set_read_buffer(self.default_mode());
        Ok(())
    }

    fn default_mode(&self) -> BufferMode {
        if self.color_buffer(LogicalBuffer::BackLeft).is_some() {
            BufferMode::Back
        } else {
            BufferMode::Front
        }
    }

    /// Whether any selected draw buffer is a front buffer
    pub fn drawing_to_front(&self) -> bool {
        match self.platform.draw_buffer_state() {
            DrawBufferState::Default(mode) => matches!(
                mode,
                BufferMode::Front
                    | BufferMode::FrontAndBack
                    | BufferMode::FrontLeft
                    | BufferMode::FrontRight
                    | BufferMode::Left
                    | BufferMode::Right
            ),
            DrawBufferState::Attachments(attachments) => {
                if !self.owns_draw_binding() {
                    return false;
                }
                let considered = if self.color_buffer(LogicalBuffer::FrontRight).is_some() { 2 } else { 1 };
                attachments
                    .iter()
                    .take(considered)
                    .any(|a| *a == 0 || *a == 2)
            }
        }
    }

    /// Whether any selected draw buffer is a right-eye buffer. Always false
    /// for mono configs.
    pub fn drawing_to_right(&self) -> bool {
        if !self.config.stereo {
            return false;
        }
        match self.platform.draw_buffer_state() {
            DrawBufferState::Default(mode) => matches!(
                mode,
                BufferMode::Right | BufferMode::FrontRight | BufferMode::BackRight
            ),
            DrawBufferState::Attachments(attachments) => {
                if !self.owns_draw_binding() {
                    return false;
                }
                let considered = if self.color_buffer(LogicalBuffer::BackRight).is_some() { 2 } else { 1 };
                attachments
                    .iter()
                    .take(considered)
                    .any(|a| *a == 2 || *a == 3)
            }
        }
    }

    fn owns_draw_binding(&self) -> bool {
        self.framebuffer().is_some()
            && self.platform.framebuffer_binding(FramebufferTarget::Draw) == self.framebuffer()
    }

    /// Attachment indices a buffer mode selects, restricted to the buffers
    /// this target actually has
    pub fn attachments_for(&self, mode: BufferMode) -> Vec<u32> {
        mode.draw_set()
            .iter()
            .filter(|buffer| self.config.has_buffer(**buffer))
            .map(|buffer| buffer.index() as u32)
            .collect()
    }

    /// Select draw buffers. In emulated mode this is a no-op unless our
    /// framebuffer is the bound draw framebuffer, and selecting only
    /// missing buffers issues an empty attachment list.
    pub fn set_draw_buffer(&self, mode: BufferMode) {
        if !self.is_emulated() {
            self.platform.draw_buffer(mode);
            return;
        }
        if !self.owns_draw_binding() {
            return;
        }
        let attachments = self.attachments_for(mode);
        self.platform.draw_attachments(&attachments);
    }

    /// Select the read buffer. In emulated mode, requests for a buffer the
    /// target does not have are ignored.
    pub fn set_read_buffer(&self, mode: BufferMode) {
        if !self.is_emulated() {
            self.platform.read_buffer(mode);
            return;
        }
        if self.framebuffer().is_none()
            || self.platform.framebuffer_binding(FramebufferTarget::Read) != self.framebuffer()
        {
            return;
        }
        match mode.read_source() {
            Some(buffer) if self.config.has_buffer(buffer) => {
                self.platform.read_attachment(buffer.index() as u32)
            }
            Some(_) => {}
            None => self.platform.read_buffer(mode),
        }
    }
}

impl Drop for OffscreenTarget {
    fn drop(&mut self) {
        self.platform.destroy_pbuffer(self.surface);
        if let Storage::EmulatedFramebuffer(buffers) = &mut self.storage {
            if let Some(rb) = buffers.depth.take() {
                self.platform.delete_renderbuffer(rb);
            }
            for rb in buffers.color.iter_mut().filter_map(Option::take) {
                self.platform.delete_renderbuffer(rb);
            }
            if let Some(fbo) = buffers.framebuffer.take() {
                self.platform.delete_framebuffer(fbo);
            }
        }
    }
}

impl std::fmt::Debug for OffscreenTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OffscreenTarget")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("config", &self.config.id)
            .field("surface", &self.surface)
            .field("storage", &self.storage)
            .field("cleared", &self.cleared)
            .field("format", &self.format)
            .finish()
    }
}
