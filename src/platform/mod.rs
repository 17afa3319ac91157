//! Graphics platform seam
//!
//! Everything the surface manager needs from the window system and the GL
//! goes through [`Platform`]. The interception layer implements it on top
//! of GLX or EGL; [`headless::HeadlessPlatform`] implements it in memory.
//!
//! The trait mirrors GL semantics closely on purpose: calls operate on
//! whatever context is current on the calling thread, object names are
//! plain integers, and failures are reported through [`Platform::get_error`]
//! rather than return values, except for the window-system calls.

pub mod headless;

use crate::error::{Result, SurfaceError};
use crate::format::{BufferMode, DataType, FbConfig, Rect, StorageFormat, TransferFormat};
use crate::handle::{
    BufferId, ConnectionId, ContextId, FramebufferId, RenderbufferId, SurfaceHandle,
};
use log::error;
use std::time::Duration;

pub const GL_INVALID_ENUM: u32 = 0x0500;
pub const GL_INVALID_VALUE: u32 = 0x0501;
pub const GL_INVALID_OPERATION: u32 = 0x0502;
pub const GL_STACK_UNDERFLOW: u32 = 0x0504;
pub const GL_INVALID_FRAMEBUFFER_OPERATION: u32 = 0x0506;

/// Extension required for staged pixel transfer
pub const PIXEL_BUFFER_OBJECT_EXTENSION: &str = "GL_ARB_pixel_buffer_object";

/// What is current on the calling thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CurrentBinding {
    pub connection: ConnectionId,
    pub context: Option<ContextId>,
    pub draw: SurfaceHandle,
    pub read: SurfaceHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Render,
    Select,
    Feedback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferTarget {
    Read,
    Draw,
    /// Both read and draw bindings
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentPoint {
    Color(u32),
    Depth,
    DepthStencil,
}

/// Draw-buffer selection of the bound draw framebuffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawBufferState {
    /// The window-system framebuffer, selected with a buffer mode
    Default(BufferMode),
    /// A framebuffer object, selected by color attachment index
    Attachments(Vec<u32>),
}

/// Where `read_pixels` puts its output
pub enum PackDestination<'a> {
    /// Host memory, synchronously
    Host(&'a mut [u8]),
    /// The buffer bound as pixel-pack buffer, offset zero
    PackBuffer,
}

pub trait Platform: Send + Sync {
    // Window system

    /// Allocate an off-screen surface with preserved contents
    fn create_pbuffer(
        &self,
        connection: ConnectionId,
        config: &FbConfig,
        width: u32,
        height: u32,
    ) -> Result<SurfaceHandle>;
    fn destroy_pbuffer(&self, surface: SurfaceHandle);
    fn swap_buffers(&self, surface: SurfaceHandle);

    /// `None` when the runtime refuses to create the context
    fn create_context(
        &self,
        connection: ConnectionId,
        config: &FbConfig,
        direct: bool,
    ) -> Option<ContextId>;
    fn destroy_context(&self, context: ContextId);
    fn current(&self) -> CurrentBinding;
    /// Binding `None` with null drawables releases the current context
    fn make_current(
        &self,
        connection: ConnectionId,
        draw: SurfaceHandle,
        read: SurfaceHandle,
        context: Option<ContextId>,
    ) -> bool;

    // Context state

    /// Pops the oldest pending error code
    fn get_error(&self) -> Option<u32>;
    fn has_extension(&self, name: &str) -> bool;
    fn max_color_attachments(&self) -> u32;
    fn render_mode(&self) -> RenderMode;

    // Framebuffer objects

    fn framebuffer_binding(&self, target: FramebufferTarget) -> Option<FramebufferId>;
    fn bind_framebuffer(&self, target: FramebufferTarget, framebuffer: Option<FramebufferId>);
    fn create_framebuffer(&self) -> FramebufferId;
    fn delete_framebuffer(&self, framebuffer: FramebufferId);
    fn create_renderbuffer(&self) -> RenderbufferId;
    fn renderbuffer_storage(
        &self,
        renderbuffer: RenderbufferId,
        format: StorageFormat,
        samples: u32,
        width: u32,
        height: u32,
    );
    fn delete_renderbuffer(&self, renderbuffer: RenderbufferId);
    /// Attaches to the bound draw framebuffer
    fn attach_renderbuffer(&self, point: AttachmentPoint, renderbuffer: Option<RenderbufferId>);
    /// Completeness of the bound draw framebuffer
    fn framebuffer_complete(&self) -> bool;

    // Buffer selection

    fn draw_buffer(&self, mode: BufferMode);
    fn draw_attachments(&self, attachments: &[u32]);
    fn draw_buffer_state(&self) -> DrawBufferState;
    fn read_buffer(&self, mode: BufferMode);
    fn read_attachment(&self, index: u32);

    // Clearing

    fn clear_color(&self) -> [f32; 4];
    fn set_clear_color(&self, color: [f32; 4]);
    fn clear(&self);

    // Pixel transfer

    fn set_pack_alignment(&self, alignment: u32);
    fn set_unpack_alignment(&self, alignment: u32);
    fn create_buffer(&self) -> Option<BufferId>;
    fn bind_pack_buffer(&self, buffer: Option<BufferId>);
    fn pack_buffer_size(&self) -> usize;
    fn pack_buffer_storage(&self, size: usize);
    fn read_pixels(
        &self,
        rect: Rect,
        format: TransferFormat,
        ty: DataType,
        destination: PackDestination<'_>,
    );
    /// Map the bound pack buffer, copy it into `dest`, unmap
    fn read_pack_buffer(&self, dest: &mut [u8]) -> Result<()>;

    // Fixed-function copy

    fn viewport(&self, rect: Rect);
    fn push_ortho(&self, width: u32, height: u32);
    fn pop_ortho(&self);
    fn raster_pos(&self, x: i32, y: i32);
    fn copy_pixels(&self, rect: Rect);

    /// Monotonic clock used to time transfers
    fn timestamp(&self) -> Duration;
}

/// Drain pending errors, logging each. Any error fails `operation`.
pub fn check_errors(platform: &dyn Platform, operation: &'static str) -> Result<()> {
    let codes = drain_errors(platform);
    if codes.is_empty() {
        return Ok(());
    }
    for code in &codes {
        error!("GL error 0x{:04x} during {}", code, operation);
    }
    Err(SurfaceError::Driver { operation, codes })
}

/// Discard pending errors so a later check only sees new ones
pub fn drain_errors(platform: &dyn Platform) -> Vec<u32> {
    let mut codes = Vec::new();
    // Bounded in case a broken driver never stops reporting
    while let Some(code) = platform.get_error() {
        codes.push(code);
        if codes.len() >= 64 {
            break;
        }
    }
    codes
}

/// Largest pack alignment the row pitch is a multiple of
pub fn pack_alignment_for(pitch: usize) -> u32 {
    if pitch % 8 == 0 {
        8
    } else if pitch % 4 == 0 {
        4
    } else if pitch % 2 == 0 {
        2
    } else {
        1
    }
}
