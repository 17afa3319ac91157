//! In-memory graphics platform
//!
//! `HeadlessPlatform` models just enough of a window system and GL context
//! to run the surface manager without a GPU: pbuffers with real pixel
//! storage for every logical buffer, framebuffer and renderbuffer objects,
//! per-thread current bindings, per-context error queues, pixel-pack
//! buffers and a simulated transfer clock.
//!
//! Nothing is rasterized. Pixels only change through `clear`,
//! `copy_pixels`, buffer swaps and the `fill_*` helpers.
//!
//! The object namespace (framebuffers, renderbuffers, buffers) is shared
//! across contexts and object creation does not need a current context.
//!
//! Transfers advance the clock by the amounts in [`TransferTiming`], which
//! is how tests make staged readback look synchronous or asynchronous.

use super::{
    AttachmentPoint, CurrentBinding, DrawBufferState, FramebufferTarget, PackDestination,
    Platform, RenderMode, GL_INVALID_ENUM, GL_INVALID_OPERATION, GL_INVALID_VALUE,
    GL_STACK_UNDERFLOW, PIXEL_BUFFER_OBJECT_EXTENSION,
};
use crate::error::{Result, SurfaceError};
use crate::format::{
    bytes_per_pixel, BufferMode, DataType, FbConfig, LogicalBuffer, Rect, StorageFormat,
    TransferFormat,
};
use crate::handle::{
    BufferId, ConnectionId, ContextId, FramebufferId, RenderbufferId, SurfaceHandle,
};
use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use std::time::Duration;

const FIRST_HANDLE: u64 = 0x40_0000;

/// Largest pbuffer or renderbuffer side the headless driver allocates
pub const MAX_SURFACE_SIZE: u32 = 16384;

/// Simulated cost of each kind of pixel transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferTiming {
    /// `read_pixels` straight into host memory
    pub synchronous: Duration,
    /// `read_pixels` into a pack buffer
    pub staged_pack: Duration,
    /// Mapping and copying a pack buffer
    pub map: Duration,
}

impl TransferTiming {
    /// Staged packs that return immediately, as a well-behaved driver does
    pub fn overlapping() -> Self {
        Self {
            synchronous: Duration::from_micros(2_000),
            staged_pack: Duration::from_micros(100),
            map: Duration::from_micros(900),
        }
    }

    /// Staged packs that block for `ratio` of the total transfer time
    pub fn blocking(ratio: f64) -> Self {
        let total = 1_000_000.0;
        let pack = (total * ratio.clamp(0.0, 1.0)) as u64;
        Self {
            synchronous: Duration::from_micros(2_000),
            staged_pack: Duration::from_nanos(pack),
            map: Duration::from_nanos(1_000_000 - pack),
        }
    }
}

impl Default for TransferTiming {
    fn default() -> Self {
        Self::overlapping()
    }
}

/// Record of observable platform calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallLog {
    pub pbuffers_created: Vec<(u32, u32)>,
    pub pbuffers_destroyed: usize,
    pub contexts_created: usize,
    pub contexts_destroyed: Vec<ContextId>,
    pub make_current: Vec<(SurfaceHandle, SurfaceHandle, Option<ContextId>)>,
    pub swaps: usize,
    pub pack_buffer_allocations: Vec<usize>,
    pub draw_attachments: Vec<Vec<u32>>,
    pub staged_reads: usize,
    pub synchronous_reads: usize,
}

#[derive(Debug, Clone)]
struct Image {
    width: u32,
    height: u32,
    has_alpha: bool,
    /// Row 0 is the bottom row
    pixels: Vec<[u8; 4]>,
}

impl Image {
    fn new(width: u32, height: u32, has_alpha: bool) -> Self {
        let fill = [0, 0, 0, if has_alpha { 0 } else { 255 }];
        Self {
            width,
            height,
            has_alpha,
            pixels: vec![fill; width as usize * height as usize],
        }
    }

    fn offset(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    fn get(&self, x: i64, y: i64) -> Option<[u8; 4]> {
        self.offset(x, y).map(|i| self.pixels[i])
    }

    fn set(&mut self, x: i64, y: i64, mut rgba: [u8; 4]) {
        if !self.has_alpha {
            rgba[3] = 255;
        }
        if let Some(i) = self.offset(x, y) {
            self.pixels[i] = rgba;
        }
    }

    fn fill(&mut self, mut rgba: [u8; 4]) {
        if !self.has_alpha {
            rgba[3] = 255;
        }
        self.pixels.fill(rgba);
    }
}

#[derive(Debug)]
struct Pbuffer {
    double_buffer: bool,
    buffers: [Option<Image>; 4],
}

impl Pbuffer {
    fn new(config: &FbConfig, width: u32, height: u32) -> Self {
        let mut buffers: [Option<Image>; 4] = Default::default();
        for buffer in config.enabled_buffers() {
            buffers[buffer.index()] = Some(Image::new(width, height, config.alpha_size > 0));
        }
        Self {
            double_buffer: config.double_buffer,
            buffers,
        }
    }

    fn has(&self, buffer: LogicalBuffer) -> bool {
        self.buffers[buffer.index()].is_some()
    }
}

#[derive(Debug)]
struct Renderbuffer {
    format: Option<StorageFormat>,
    image: Image,
}

#[derive(Debug)]
struct Framebuffer {
    color: HashMap<u32, RenderbufferId>,
    depth: Option<(AttachmentPoint, RenderbufferId)>,
    draw_buffers: Vec<u32>,
    read_attachment: Option<u32>,
}

impl Default for Framebuffer {
    fn default() -> Self {
        Self {
            color: HashMap::new(),
            depth: None,
            draw_buffers: vec![0],
            read_attachment: Some(0),
        }
    }
}

#[derive(Debug)]
struct Context {
    draw_fb: Option<FramebufferId>,
    read_fb: Option<FramebufferId>,
    draw_mode: BufferMode,
    read_mode: BufferMode,
    clear_color: [f32; 4],
    render_mode: RenderMode,
    pack_buffer: Option<BufferId>,
    pack_alignment: u32,
    unpack_alignment: u32,
    errors: VecDeque<u32>,
    ortho_depth: u32,
    raster: (i32, i32),
    viewport: Rect,
}

impl Context {
    fn new(config: &FbConfig) -> Self {
        let default_mode = if config.double_buffer {
            BufferMode::Back
        } else {
            BufferMode::Front
        };
        Self {
            draw_fb: None,
            read_fb: None,
            draw_mode: default_mode,
            read_mode: default_mode,
            clear_color: [0.0; 4],
            render_mode: RenderMode::Render,
            pack_buffer: None,
            pack_alignment: 4,
            unpack_alignment: 4,
            errors: VecDeque::new(),
            ortho_depth: 0,
            raster: (0, 0),
            viewport: Rect::new(0, 0, 0, 0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImageRef {
    Surface(SurfaceHandle, usize),
    Renderbuffer(RenderbufferId),
}

#[derive(Debug)]
struct World {
    next_handle: u64,
    next_name: u32,
    surfaces: HashMap<SurfaceHandle, Pbuffer>,
    contexts: HashMap<ContextId, Context>,
    framebuffers: HashMap<FramebufferId, Framebuffer>,
    renderbuffers: HashMap<RenderbufferId, Renderbuffer>,
    buffers: HashMap<BufferId, Vec<u8>>,
    current: HashMap<ThreadId, CurrentBinding>,
    max_color_attachments: u32,
    extensions: Vec<String>,
    incomplete_framebuffers: bool,
    refuse_contexts: bool,
    timing: TransferTiming,
    calls: CallLog,
}

impl World {
    fn handle(&mut self) -> u64 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn name(&mut self) -> u32 {
        let name = self.next_name;
        self.next_name += 1;
        name
    }

    fn binding(&self) -> CurrentBinding {
        self.current
            .get(&thread::current().id())
            .copied()
            .unwrap_or_default()
    }

    /// Current context id if it is still alive
    fn live_context(&self) -> Option<ContextId> {
        self.binding()
            .context
            .filter(|ctx| self.contexts.contains_key(ctx))
    }

    fn context_mut(&mut self) -> Option<&mut Context> {
        let ctx = self.live_context()?;
        self.contexts.get_mut(&ctx)
    }

    fn context(&self) -> Option<&Context> {
        let ctx = self.live_context()?;
        self.contexts.get(&ctx)
    }

    fn raise(&mut self, code: u32) {
        if let Some(ctx) = self.context_mut() {
            trace!("headless GL error 0x{:04x}", code);
            ctx.errors.push_back(code);
        }
    }

    fn draw_targets(&self) -> Vec<ImageRef> {
        let Some(ctx) = self.context() else {
            return Vec::new();
        };
        match ctx.draw_fb {
            Some(fb) => self
                .framebuffers
                .get(&fb)
                .map(|fb| {
                    fb.draw_buffers
                        .iter()
                        .filter_map(|index| fb.color.get(index))
                        .filter(|rb| self.has_storage(**rb))
                        .map(|rb| ImageRef::Renderbuffer(*rb))
                        .collect()
                })
                .unwrap_or_default(),
            None => {
                let surface = self.binding().draw;
                match self.surfaces.get(&surface) {
                    Some(pbuffer) => ctx
                        .draw_mode
                        .draw_set()
                        .iter()
                        .filter(|buffer| pbuffer.has(**buffer))
                        .map(|buffer| ImageRef::Surface(surface, buffer.index()))
                        .collect(),
                    None => Vec::new(),
                }
            }
        }
    }

    fn read_source(&self) -> Option<ImageRef> {
        let ctx = self.context()?;
        match ctx.read_fb {
            Some(fb) => {
                let fb = self.framebuffers.get(&fb)?;
                let rb = fb.color.get(&fb.read_attachment?)?;
                self.has_storage(*rb).then_some(ImageRef::Renderbuffer(*rb))
            }
            None => {
                let surface = self.binding().read;
                let pbuffer = self.surfaces.get(&surface)?;
                let buffer = ctx.read_mode.read_source()?;
                pbuffer
                    .has(buffer)
                    .then_some(ImageRef::Surface(surface, buffer.index()))
            }
        }
    }

    fn has_storage(&self, rb: RenderbufferId) -> bool {
        self.renderbuffers
            .get(&rb)
            .map(|rb| rb.format.is_some())
            .unwrap_or(false)
    }

    fn image(&self, image: ImageRef) -> Option<&Image> {
        match image {
            ImageRef::Surface(surface, index) => {
                self.surfaces.get(&surface)?.buffers[index].as_ref()
            }
            ImageRef::Renderbuffer(rb) => self.renderbuffers.get(&rb).map(|rb| &rb.image),
        }
    }

    fn image_mut(&mut self, image: ImageRef) -> Option<&mut Image> {
        match image {
            ImageRef::Surface(surface, index) => {
                self.surfaces.get_mut(&surface)?.buffers[index].as_mut()
            }
            ImageRef::Renderbuffer(rb) => self.renderbuffers.get_mut(&rb).map(|rb| &mut rb.image),
        }
    }
}

/// Software stand-in for a GLX/EGL + GL stack
#[derive(Debug)]
pub struct HeadlessPlatform {
    world: Mutex<World>,
    clock_ns: AtomicU64,
}

impl Default for HeadlessPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessPlatform {
    pub fn new() -> Self {
        Self {
            world: Mutex::new(World {
                next_handle: FIRST_HANDLE,
                next_name: 1,
                surfaces: HashMap::new(),
                contexts: HashMap::new(),
                framebuffers: HashMap::new(),
                renderbuffers: HashMap::new(),
                buffers: HashMap::new(),
                current: HashMap::new(),
                max_color_attachments: 8,
                extensions: vec![
                    PIXEL_BUFFER_OBJECT_EXTENSION.to_string(),
                    "GL_ARB_framebuffer_object".to_string(),
                ],
                incomplete_framebuffers: false,
                refuse_contexts: false,
                timing: TransferTiming::default(),
                calls: CallLog::default(),
            }),
            clock_ns: AtomicU64::new(0),
        }
    }

    pub fn set_max_color_attachments(&self, limit: u32) {
        self.world.lock().max_color_attachments = limit;
    }

    pub fn set_extensions(&self, extensions: &[&str]) {
        self.world.lock().extensions = extensions.iter().map(|e| e.to_string()).collect();
    }

    /// Make every framebuffer completeness check fail
    pub fn set_incomplete_framebuffers(&self, incomplete: bool) {
        self.world.lock().incomplete_framebuffers = incomplete;
    }

    pub fn set_refuse_contexts(&self, refuse: bool) {
        self.world.lock().refuse_contexts = refuse;
    }

    pub fn set_transfer_timing(&self, timing: TransferTiming) {
        self.world.lock().timing = timing;
    }

    /// Switch the render mode of the context current on this thread
    pub fn set_render_mode(&self, mode: RenderMode) {
        if let Some(ctx) = self.world.lock().context_mut() {
            ctx.render_mode = mode;
        }
    }

    /// Queue an error on the context current on this thread
    pub fn inject_error(&self, code: u32) {
        self.world.lock().raise(code);
    }

    pub fn advance_clock(&self, by: Duration) {
        self.clock_ns
            .fetch_add(by.as_nanos() as u64, Ordering::AcqRel);
    }

    pub fn calls(&self) -> CallLog {
        self.world.lock().calls.clone()
    }

    pub fn reset_calls(&self) {
        self.world.lock().calls = CallLog::default();
    }

    pub fn context_exists(&self, context: ContextId) -> bool {
        self.world.lock().contexts.contains_key(&context)
    }

    pub fn context_count(&self) -> usize {
        self.world.lock().contexts.len()
    }

    pub fn surface_exists(&self, surface: SurfaceHandle) -> bool {
        self.world.lock().surfaces.contains_key(&surface)
    }

    pub fn surface_size(&self, surface: SurfaceHandle) -> Option<(u32, u32)> {
        let world = self.world.lock();
        let pbuffer = world.surfaces.get(&surface)?;
        pbuffer.buffers[0]
            .as_ref()
            .map(|image| (image.width, image.height))
    }

    pub fn renderbuffer_count(&self) -> usize {
        self.world.lock().renderbuffers.len()
    }

    pub fn framebuffer_count(&self) -> usize {
        self.world.lock().framebuffers.len()
    }

    pub fn framebuffer_attachment(
        &self,
        framebuffer: FramebufferId,
        point: AttachmentPoint,
    ) -> Option<RenderbufferId> {
        let world = self.world.lock();
        let fb = world.framebuffers.get(&framebuffer)?;
        match point {
            AttachmentPoint::Color(index) => fb.color.get(&index).copied(),
            AttachmentPoint::Depth | AttachmentPoint::DepthStencil => fb
                .depth
                .filter(|(attached_at, _)| *attached_at == point)
                .map(|(_, rb)| rb),
        }
    }

    pub fn renderbuffer_format(&self, renderbuffer: RenderbufferId) -> Option<StorageFormat> {
        self.world
            .lock()
            .renderbuffers
            .get(&renderbuffer)
            .and_then(|rb| rb.format)
    }

    pub fn surface_pixel(
        &self,
        surface: SurfaceHandle,
        buffer: LogicalBuffer,
        x: u32,
        y: u32,
    ) -> Option<[u8; 4]> {
        let world = self.world.lock();
        world
            .image(ImageRef::Surface(surface, buffer.index()))?
            .get(x as i64, y as i64)
    }

    /// Raw RGBA bytes of one surface buffer, bottom row first
    pub fn surface_bytes(&self, surface: SurfaceHandle, buffer: LogicalBuffer) -> Option<Vec<u8>> {
        let world = self.world.lock();
        let image = world.image(ImageRef::Surface(surface, buffer.index()))?;
        Some(bytemuck::cast_slice::<[u8; 4], u8>(&image.pixels).to_vec())
    }

    pub fn fill_surface(&self, surface: SurfaceHandle, buffer: LogicalBuffer, rgba: [u8; 4]) {
        let mut world = self.world.lock();
        if let Some(image) = world.image_mut(ImageRef::Surface(surface, buffer.index())) {
            image.fill(rgba);
        }
    }

    pub fn renderbuffer_pixel(&self, renderbuffer: RenderbufferId, x: u32, y: u32) -> Option<[u8; 4]> {
        let world = self.world.lock();
        world
            .image(ImageRef::Renderbuffer(renderbuffer))?
            .get(x as i64, y as i64)
    }

    pub fn fill_renderbuffer(&self, renderbuffer: RenderbufferId, rgba: [u8; 4]) {
        let mut world = self.world.lock();
        if let Some(image) = world.image_mut(ImageRef::Renderbuffer(renderbuffer)) {
            image.fill(rgba);
        }
    }

    /// Set one pixel in whatever the bound draw buffers are
    pub fn plot(&self, x: i32, y: i32, rgba: [u8; 4]) {
        let mut world = self.world.lock();
        for target in world.draw_targets() {
            if let Some(image) = world.image_mut(target) {
                image.set(x as i64, y as i64, rgba);
            }
        }
    }

    fn tick(&self, by: Duration) {
        self.advance_clock(by);
    }
}

impl Platform for HeadlessPlatform {
    fn create_pbuffer(
        &self,
        connection: ConnectionId,
        config: &FbConfig,
        width: u32,
        height: u32,
    ) -> Result<SurfaceHandle> {
        if width == 0 || height == 0 || width > MAX_SURFACE_SIZE || height > MAX_SURFACE_SIZE {
            return Err(SurfaceError::Platform(format!(
                "could not create {}x{} pbuffer",
                width, height
            )));
        }
        let mut world = self.world.lock();
        let surface = SurfaceHandle(world.handle());
        world
            .surfaces
            .insert(surface, Pbuffer::new(config, width, height));
        world.calls.pbuffers_created.push((width, height));
        debug!(
            "headless pbuffer {} ({}x{}, config {}) on connection {}",
            surface, width, height, config.id, connection
        );
        Ok(surface)
    }

    fn destroy_pbuffer(&self, surface: SurfaceHandle) {
        let mut world = self.world.lock();
        if world.surfaces.remove(&surface).is_some() {
            world.calls.pbuffers_destroyed += 1;
        }
    }

    fn swap_buffers(&self, surface: SurfaceHandle) {
        let mut world = self.world.lock();
        world.calls.swaps += 1;
        if let Some(pbuffer) = world.surfaces.get_mut(&surface) {
            if pbuffer.double_buffer {
                pbuffer.buffers.swap(0, 1);
                pbuffer.buffers.swap(2, 3);
            }
        }
    }

    fn create_context(
        &self,
        _connection: ConnectionId,
        config: &FbConfig,
        _direct: bool,
    ) -> Option<ContextId> {
        let mut world = self.world.lock();
        if world.refuse_contexts {
            return None;
        }
        let context = ContextId(world.handle());
        world.contexts.insert(context, Context::new(config));
        world.calls.contexts_created += 1;
        Some(context)
    }

    fn destroy_context(&self, context: ContextId) {
        let mut world = self.world.lock();
        if world.contexts.remove(&context).is_some() {
            world.calls.contexts_destroyed.push(context);
        }
    }

    fn current(&self) -> CurrentBinding {
        self.world.lock().binding()
    }

    fn make_current(
        &self,
        connection: ConnectionId,
        draw: SurfaceHandle,
        read: SurfaceHandle,
        context: Option<ContextId>,
    ) -> bool {
        let mut world = self.world.lock();
        world.calls.make_current.push((draw, read, context));

        let ok = match context {
            None => draw.is_null() && read.is_null(),
            Some(ctx) => {
                world.contexts.contains_key(&ctx)
                    && [draw, read]
                        .iter()
                        .all(|s| s.is_null() || world.surfaces.contains_key(s))
            }
        };
        if ok {
            world.current.insert(
                thread::current().id(),
                CurrentBinding {
                    connection,
                    context,
                    draw,
                    read,
                },
            );
        }
        ok
    }

    fn get_error(&self) -> Option<u32> {
        self.world.lock().context_mut()?.errors.pop_front()
    }

    fn has_extension(&self, name: &str) -> bool {
        self.world.lock().extensions.iter().any(|e| e == name)
    }

    fn max_color_attachments(&self) -> u32 {
        self.world.lock().max_color_attachments
    }

    fn render_mode(&self) -> RenderMode {
        self.world
            .lock()
            .context()
            .map(|ctx| ctx.render_mode)
            .unwrap_or(RenderMode::Render)
    }

    fn framebuffer_binding(&self, target: FramebufferTarget) -> Option<FramebufferId> {
        let world = self.world.lock();
        let ctx = world.context()?;
        match target {
            FramebufferTarget::Read => ctx.read_fb,
            FramebufferTarget::Draw | FramebufferTarget::Both => ctx.draw_fb,
        }
    }

    fn bind_framebuffer(&self, target: FramebufferTarget, framebuffer: Option<FramebufferId>) {
        let mut world = self.world.lock();
        if let Some(fb) = framebuffer {
            if !world.framebuffers.contains_key(&fb) {
                world.raise(GL_INVALID_OPERATION);
                return;
            }
        }
        let Some(ctx) = world.context_mut() else {
            return;
        };
        match target {
            FramebufferTarget::Read => ctx.read_fb = framebuffer,
            FramebufferTarget::Draw => ctx.draw_fb = framebuffer,
            FramebufferTarget::Both => {
                ctx.read_fb = framebuffer;
                ctx.draw_fb = framebuffer;
            }
        }
    }

    fn create_framebuffer(&self) -> FramebufferId {
        let mut world = self.world.lock();
        let fb = FramebufferId(world.name());
        world.framebuffers.insert(fb, Framebuffer::default());
        fb
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferId) {
        let mut world = self.world.lock();
        world.framebuffers.remove(&framebuffer);
        // Only the current context's bindings revert to the default
        if let Some(ctx) = world.context_mut() {
            if ctx.draw_fb == Some(framebuffer) {
                ctx.draw_fb = None;
            }
            if ctx.read_fb == Some(framebuffer) {
                ctx.read_fb = None;
            }
        }
    }

    fn create_renderbuffer(&self) -> RenderbufferId {
        let mut world = self.world.lock();
        let rb = RenderbufferId(world.name());
        world.renderbuffers.insert(
            rb,
            Renderbuffer {
                format: None,
                image: Image::new(0, 0, true),
            },
        );
        rb
    }

    fn renderbuffer_storage(
        &self,
        renderbuffer: RenderbufferId,
        format: StorageFormat,
        _samples: u32,
        width: u32,
        height: u32,
    ) {
        let mut world = self.world.lock();
        if width > MAX_SURFACE_SIZE || height > MAX_SURFACE_SIZE {
            world.raise(GL_INVALID_VALUE);
            return;
        }
        match world.renderbuffers.get_mut(&renderbuffer) {
            Some(rb) => {
                let has_alpha = matches!(format, StorageFormat::Rgba8 | StorageFormat::Rgb10A2);
                rb.format = Some(format);
                rb.image = Image::new(width, height, has_alpha);
            }
            None => world.raise(GL_INVALID_OPERATION),
        }
    }

    fn delete_renderbuffer(&self, renderbuffer: RenderbufferId) {
        let mut world = self.world.lock();
        world.renderbuffers.remove(&renderbuffer);
        for fb in world.framebuffers.values_mut() {
            fb.color.retain(|_, rb| *rb != renderbuffer);
            if matches!(fb.depth, Some((_, rb)) if rb == renderbuffer) {
                fb.depth = None;
            }
        }
    }

    fn attach_renderbuffer(&self, point: AttachmentPoint, renderbuffer: Option<RenderbufferId>) {
        let mut world = self.world.lock();
        let max = world.max_color_attachments;
        let Some(fb_id) = world.context().and_then(|ctx| ctx.draw_fb) else {
            world.raise(GL_INVALID_OPERATION);
            return;
        };
        if let Some(rb) = renderbuffer {
            if !world.renderbuffers.contains_key(&rb) {
                world.raise(GL_INVALID_OPERATION);
                return;
            }
        }
        if let AttachmentPoint::Color(index) = point {
            if index >= max {
                world.raise(GL_INVALID_VALUE);
                return;
            }
        }
        let Some(fb) = world.framebuffers.get_mut(&fb_id) else {
            return;
        };
        match (point, renderbuffer) {
            (AttachmentPoint::Color(index), Some(rb)) => {
                fb.color.insert(index, rb);
            }
            (AttachmentPoint::Color(index), None) => {
                fb.color.remove(&index);
            }
            (_, Some(rb)) => fb.depth = Some((point, rb)),
            (_, None) => fb.depth = None,
        }
    }

    fn framebuffer_complete(&self) -> bool {
        let world = self.world.lock();
        if world.incomplete_framebuffers {
            return false;
        }
        let Some(fb_id) = world.context().and_then(|ctx| ctx.draw_fb) else {
            return true;
        };
        let Some(fb) = world.framebuffers.get(&fb_id) else {
            return false;
        };
        let attached: Vec<&Renderbuffer> = fb
            .color
            .values()
            .chain(fb.depth.iter().map(|(_, rb)| rb))
            .filter_map(|rb| world.renderbuffers.get(rb))
            .collect();
        if fb.color.is_empty() || attached.iter().any(|rb| rb.format.is_none()) {
            return false;
        }
        let (w, h) = (attached[0].image.width, attached[0].image.height);
        attached
            .iter()
            .all(|rb| rb.image.width == w && rb.image.height == h)
    }

    fn draw_buffer(&self, mode: BufferMode) {
        let mut world = self.world.lock();
        let binding = world.binding();
        let Some(ctx) = world.context() else {
            return;
        };
        if ctx.draw_fb.is_some() {
            if mode != BufferMode::None {
                world.raise(GL_INVALID_OPERATION);
            }
            return;
        }
        let selectable = world
            .surfaces
            .get(&binding.draw)
            .map(|pbuffer| mode.draw_set().iter().any(|b| pbuffer.has(*b)))
            .unwrap_or(false);
        if mode != BufferMode::None && !selectable {
            world.raise(GL_INVALID_OPERATION);
            return;
        }
        if let Some(ctx) = world.context_mut() {
            ctx.draw_mode = mode;
        }
    }

    fn draw_attachments(&self, attachments: &[u32]) {
        let mut world = self.world.lock();
        world.calls.draw_attachments.push(attachments.to_vec());
        let max = world.max_color_attachments;
        let Some(ctx) = world.context() else {
            return;
        };
        let Some(fb_id) = ctx.draw_fb else {
            if !attachments.is_empty() {
                world.raise(GL_INVALID_OPERATION);
            }
            return;
        };
        if attachments.len() as u32 > max || attachments.iter().any(|a| *a >= max) {
            world.raise(GL_INVALID_OPERATION);
            return;
        }
        if let Some(fb) = world.framebuffers.get_mut(&fb_id) {
            fb.draw_buffers = attachments.to_vec();
        }
    }

    fn draw_buffer_state(&self) -> DrawBufferState {
        let world = self.world.lock();
        let Some(ctx) = world.context() else {
            return DrawBufferState::Default(BufferMode::None);
        };
        match ctx.draw_fb.and_then(|fb| world.framebuffers.get(&fb)) {
            Some(fb) => DrawBufferState::Attachments(fb.draw_buffers.clone()),
            None => DrawBufferState::Default(ctx.draw_mode),
        }
    }

    fn read_buffer(&self, mode: BufferMode) {
        let mut world = self.world.lock();
        let binding = world.binding();
        let Some(ctx) = world.context() else {
            return;
        };
        if ctx.read_fb.is_some() {
            if mode != BufferMode::None {
                world.raise(GL_INVALID_OPERATION);
            }
            return;
        }
        let Some(source) = mode.read_source() else {
            world.raise(GL_INVALID_ENUM);
            return;
        };
        let present = world
            .surfaces
            .get(&binding.read)
            .map(|pbuffer| pbuffer.has(source))
            .unwrap_or(false);
        if !present {
            world.raise(GL_INVALID_OPERATION);
            return;
        }
        if let Some(ctx) = world.context_mut() {
            ctx.read_mode = mode;
        }
    }

    fn read_attachment(&self, index: u32) {
        let mut world = self.world.lock();
        let max = world.max_color_attachments;
        let Some(fb_id) = world.context().and_then(|ctx| ctx.read_fb) else {
            world.raise(GL_INVALID_OPERATION);
            return;
        };
        if index >= max {
            world.raise(GL_INVALID_OPERATION);
            return;
        }
        if let Some(fb) = world.framebuffers.get_mut(&fb_id) {
            fb.read_attachment = Some(index);
        }
    }

    fn clear_color(&self) -> [f32; 4] {
        self.world
            .lock()
            .context()
            .map(|ctx| ctx.clear_color)
            .unwrap_or([0.0; 4])
    }

    fn set_clear_color(&self, color: [f32; 4]) {
        if let Some(ctx) = self.world.lock().context_mut() {
            ctx.clear_color = color.map(|c| c.clamp(0.0, 1.0));
        }
    }

    fn clear(&self) {
        let mut world = self.world.lock();
        let Some(color) = world.context().map(|ctx| ctx.clear_color) else {
            return;
        };
        let rgba = color.map(|c| (c * 255.0).round() as u8);
        for target in world.draw_targets() {
            if let Some(image) = world.image_mut(target) {
                image.fill(rgba);
            }
        }
    }

    fn set_pack_alignment(&self, alignment: u32) {
        let mut world = self.world.lock();
        if !matches!(alignment, 1 | 2 | 4 | 8) {
            world.raise(GL_INVALID_VALUE);
            return;
        }
        if let Some(ctx) = world.context_mut() {
            ctx.pack_alignment = alignment;
        }
    }

    fn set_unpack_alignment(&self, alignment: u32) {
        let mut world = self.world.lock();
        if !matches!(alignment, 1 | 2 | 4 | 8) {
            world.raise(GL_INVALID_VALUE);
            return;
        }
        if let Some(ctx) = world.context_mut() {
            ctx.unpack_alignment = alignment;
        }
    }

    fn create_buffer(&self) -> Option<BufferId> {
        let mut world = self.world.lock();
        let buffer = BufferId(world.name());
        world.buffers.insert(buffer, Vec::new());
        Some(buffer)
    }

    fn bind_pack_buffer(&self, buffer: Option<BufferId>) {
        let mut world = self.world.lock();
        if let Some(buffer) = buffer {
            if !world.buffers.contains_key(&buffer) {
                world.raise(GL_INVALID_OPERATION);
                return;
            }
        }
        if let Some(ctx) = world.context_mut() {
            ctx.pack_buffer = buffer;
        }
    }

    fn pack_buffer_size(&self) -> usize {
        let world = self.world.lock();
        world
            .context()
            .and_then(|ctx| ctx.pack_buffer)
            .and_then(|buffer| world.buffers.get(&buffer))
            .map(|data| data.len())
            .unwrap_or(0)
    }

    fn pack_buffer_storage(&self, size: usize) {
        let mut world = self.world.lock();
        let Some(buffer) = world.context().and_then(|ctx| ctx.pack_buffer) else {
            world.raise(GL_INVALID_OPERATION);
            return;
        };
        world.calls.pack_buffer_allocations.push(size);
        if let Some(data) = world.buffers.get_mut(&buffer) {
            *data = vec![0; size];
        }
    }

    fn read_pixels(
        &self,
        rect: Rect,
        format: TransferFormat,
        ty: DataType,
        destination: PackDestination<'_>,
    ) {
        let mut world = self.world.lock();
        let Some((alignment, pack_buffer)) = world
            .context()
            .map(|ctx| (ctx.pack_alignment as usize, ctx.pack_buffer))
        else {
            return;
        };
        if ty.is_packed() && format.components() != 4 {
            world.raise(GL_INVALID_OPERATION);
            return;
        }
        let Some(source) = world.read_source() else {
            world.raise(GL_INVALID_OPERATION);
            return;
        };

        let bpp = bytes_per_pixel(format, ty);
        let row_bytes = rect.width as usize * bpp;
        let stride = row_bytes.div_ceil(alignment) * alignment;
        let required = if rect.is_empty() {
            0
        } else {
            stride * (rect.height as usize - 1) + row_bytes
        };

        let mut packed = vec![0u8; required];
        if let Some(image) = world.image(source) {
            for row in 0..rect.height as usize {
                for col in 0..rect.width as usize {
                    let x = rect.x as i64 + col as i64;
                    let y = rect.y as i64 + row as i64;
                    if let Some(px) = image.get(x, y) {
                        let at = row * stride + col * bpp;
                        encode_pixel(px, format, ty, &mut packed[at..at + bpp]);
                    }
                }
            }
        }

        let timing = world.timing;
        match destination {
            PackDestination::Host(dest) => {
                if pack_buffer.is_some() || dest.len() < required {
                    world.raise(GL_INVALID_OPERATION);
                    return;
                }
                dest[..required].copy_from_slice(&packed);
                world.calls.synchronous_reads += 1;
                drop(world);
                self.tick(timing.synchronous);
            }
            PackDestination::PackBuffer => {
                let Some(data) = pack_buffer.and_then(|b| world.buffers.get_mut(&b)) else {
                    world.raise(GL_INVALID_OPERATION);
                    return;
                };
                if data.len() < required {
                    world.raise(GL_INVALID_OPERATION);
                    return;
                }
                data[..required].copy_from_slice(&packed);
                world.calls.staged_reads += 1;
                drop(world);
                self.tick(timing.staged_pack);
            }
        }
    }

    fn read_pack_buffer(&self, dest: &mut [u8]) -> Result<()> {
        let world = self.world.lock();
        let data = world
            .context()
            .and_then(|ctx| ctx.pack_buffer)
            .and_then(|buffer| world.buffers.get(&buffer))
            .ok_or_else(|| SurfaceError::Platform("could not map pixel buffer object".into()))?;
        let n = dest.len().min(data.len());
        dest[..n].copy_from_slice(&data[..n]);
        let map = world.timing.map;
        drop(world);
        self.tick(map);
        Ok(())
    }

    fn viewport(&self, rect: Rect) {
        if let Some(ctx) = self.world.lock().context_mut() {
            ctx.viewport = rect;
        }
    }

    fn push_ortho(&self, _width: u32, _height: u32) {
        if let Some(ctx) = self.world.lock().context_mut() {
            ctx.ortho_depth += 1;
        }
    }

    fn pop_ortho(&self) {
        let mut world = self.world.lock();
        let underflow = match world.context_mut() {
            Some(ctx) if ctx.ortho_depth > 0 => {
                ctx.ortho_depth -= 1;
                false
            }
            Some(_) => true,
            None => false,
        };
        if underflow {
            world.raise(GL_STACK_UNDERFLOW);
        }
    }

    fn raster_pos(&self, x: i32, y: i32) {
        if let Some(ctx) = self.world.lock().context_mut() {
            ctx.raster = (x, y);
        }
    }

    fn copy_pixels(&self, rect: Rect) {
        let mut world = self.world.lock();
        let Some((rx, ry)) = world.context().map(|ctx| ctx.raster) else {
            return;
        };
        let Some(source) = world.read_source() else {
            world.raise(GL_INVALID_OPERATION);
            return;
        };
        let Some(image) = world.image(source) else {
            return;
        };
        let mut block = Vec::with_capacity(rect.width as usize * rect.height as usize);
        for row in 0..rect.height as i64 {
            for col in 0..rect.width as i64 {
                block.push(image.get(rect.x as i64 + col, rect.y as i64 + row));
            }
        }
        for target in world.draw_targets() {
            let Some(image) = world.image_mut(target) else {
                continue;
            };
            for row in 0..rect.height as i64 {
                for col in 0..rect.width as i64 {
                    let index = (row * rect.width as i64 + col) as usize;
                    if let Some(px) = block[index] {
                        image.set(rx as i64 + col, ry as i64 + row, px);
                    }
                }
            }
        }
    }

    fn timestamp(&self) -> Duration {
        Duration::from_nanos(self.clock_ns.load(Ordering::Acquire))
    }
}

fn expand10(v: u8) -> u32 {
    ((v as u32) << 2) | ((v as u32) >> 6)
}

fn expand2(v: u8) -> u32 {
    (v as u32) >> 6
}

/// Pack one RGBA8 pixel into `out` in the requested transfer layout
fn encode_pixel(px: [u8; 4], format: TransferFormat, ty: DataType, out: &mut [u8]) {
    let [r, g, b, a] = px;
    let comps: [u8; 4] = match format {
        TransferFormat::Rgb => [r, g, b, 0],
        TransferFormat::Rgba => [r, g, b, a],
        TransferFormat::Bgr => [b, g, r, 0],
        TransferFormat::Bgra => [b, g, r, a],
        TransferFormat::Abgr => [a, b, g, r],
        TransferFormat::Red => [r, 0, 0, 0],
        TransferFormat::Green => [g, 0, 0, 0],
        TransferFormat::Blue => [b, 0, 0, 0],
    };
    let packed = match ty {
        DataType::UnsignedByte => {
            let n = format.components();
            out[..n].copy_from_slice(&comps[..n]);
            return;
        }
        DataType::UnsignedInt8888 => u32::from_be_bytes(comps),
        DataType::UnsignedInt8888Rev => u32::from_le_bytes(comps),
        DataType::UnsignedInt2101010Rev => {
            expand10(comps[0])
                | expand10(comps[1]) << 10
                | expand10(comps[2]) << 20
                | expand2(comps[3]) << 30
        }
        DataType::UnsignedInt1010102 => {
            expand10(comps[0]) << 22
                | expand10(comps[1]) << 12
                | expand10(comps[2]) << 2
                | expand2(comps[3])
        }
    };
    out[..4].copy_from_slice(&packed.to_ne_bytes());
}
