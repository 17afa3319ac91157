//! Pixel formats, buffer selection and transfer formats
//!
//! Three different notions of "format" meet here:
//! - [`FbConfig`]: the framebuffer configuration a surface is created with
//!   (bit depths, double buffering, stereo, multisampling, depth/stencil)
//! - [`TransferFormat`] + [`DataType`]: how pixels are laid out when they
//!   are transferred from the GPU to host memory
//! - [`PixelFormat`]: the abstract pixel format the transport asks for,
//!   mapped to a native transfer format through a fixed table

use crate::error::SurfaceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity of a framebuffer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FbConfigId(pub u32);

impl FbConfigId {
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for FbConfigId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Framebuffer configuration descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FbConfig {
    pub id: FbConfigId,
    pub red_size: u8,
    pub green_size: u8,
    pub blue_size: u8,
    pub alpha_size: u8,
    pub depth_size: u8,
    pub stencil_size: u8,
    pub samples: u8,
    pub double_buffer: bool,
    pub stereo: bool,
}

impl FbConfig {
    /// 8-bit RGB, single-buffered, mono, no depth
    pub fn rgb8(id: u32) -> Self {
        Self {
            id: FbConfigId(id),
            red_size: 8,
            green_size: 8,
            blue_size: 8,
            alpha_size: 0,
            depth_size: 0,
            stencil_size: 0,
            samples: 0,
            double_buffer: false,
            stereo: false,
        }
    }

    /// 8-bit RGBA, single-buffered, mono, no depth
    pub fn rgba8(id: u32) -> Self {
        Self {
            alpha_size: 8,
            ..Self::rgb8(id)
        }
    }

    pub fn with_double_buffer(mut self, enabled: bool) -> Self {
        self.double_buffer = enabled;
        self
    }

    pub fn with_stereo(mut self, enabled: bool) -> Self {
        self.stereo = enabled;
        self
    }

    pub fn with_depth(mut self, depth: u8, stencil: u8) -> Self {
        self.depth_size = depth;
        self.stencil_size = stencil;
        self
    }

    pub fn with_samples(mut self, samples: u8) -> Self {
        self.samples = samples;
        self
    }

    pub fn rgb_size(&self) -> u32 {
        self.red_size as u32 + self.green_size as u32 + self.blue_size as u32
    }

    pub fn pixel_size(&self) -> u32 {
        self.rgb_size() + self.alpha_size as u32
    }

    /// Number of color buffers a fully populated surface with this config has
    pub fn logical_buffer_count(&self) -> u32 {
        (self.double_buffer as u32 + 1) * (self.stereo as u32 + 1)
    }

    pub fn has_buffer(&self, buffer: LogicalBuffer) -> bool {
        (!buffer.is_back() || self.double_buffer) && (!buffer.is_right() || self.stereo)
    }

    /// Enabled logical buffers in index order.
    ///
    /// Steps by one slot when double-buffered and by two otherwise, so a
    /// single-buffered stereo config yields front-left and front-right only.
    pub fn enabled_buffers(&self) -> impl Iterator<Item = LogicalBuffer> {
        let end = 2 * (self.stereo as usize + 1);
        let step = if self.double_buffer { 1 } else { 2 };
        (0..end).step_by(step).filter_map(LogicalBuffer::from_index)
    }

    /// Storage format for color buffers
    pub fn color_storage(&self) -> StorageFormat {
        match (self.red_size == 10, self.alpha_size > 0) {
            (true, true) => StorageFormat::Rgb10A2,
            (true, false) => StorageFormat::Rgb10,
            (false, true) => StorageFormat::Rgba8,
            (false, false) => StorageFormat::Rgb8,
        }
    }

    /// Storage format for the depth buffer, if the config asks for one
    pub fn depth_storage(&self) -> Option<StorageFormat> {
        match (self.depth_size > 0, self.stencil_size > 0) {
            (false, _) => None,
            (true, true) => Some(StorageFormat::Depth24Stencil8),
            (true, false) => Some(StorageFormat::Depth24),
        }
    }
}

/// Renderbuffer storage formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageFormat {
    Rgb8,
    Rgba8,
    Rgb10,
    Rgb10A2,
    Depth24,
    Depth24Stencil8,
}

impl StorageFormat {
    pub fn is_color(self) -> bool {
        !matches!(self, StorageFormat::Depth24 | StorageFormat::Depth24Stencil8)
    }
}

/// One of the four color buffers a surface can expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LogicalBuffer {
    FrontLeft = 0,
    BackLeft = 1,
    FrontRight = 2,
    BackRight = 3,
}

impl LogicalBuffer {
    pub const ALL: [LogicalBuffer; 4] = [
        LogicalBuffer::FrontLeft,
        LogicalBuffer::BackLeft,
        LogicalBuffer::FrontRight,
        LogicalBuffer::BackRight,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn is_back(self) -> bool {
        matches!(self, LogicalBuffer::BackLeft | LogicalBuffer::BackRight)
    }

    pub fn is_right(self) -> bool {
        matches!(self, LogicalBuffer::FrontRight | LogicalBuffer::BackRight)
    }
}

/// Buffer-selection token as passed to draw/read buffer calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferMode {
    FrontLeft,
    FrontRight,
    BackLeft,
    BackRight,
    Front,
    Back,
    Left,
    Right,
    FrontAndBack,
    None,
}

impl BufferMode {
    /// Every logical buffer this mode selects for drawing
    pub fn draw_set(self) -> &'static [LogicalBuffer] {
        use LogicalBuffer::*;
        match self {
            BufferMode::FrontLeft => &[FrontLeft],
            BufferMode::BackLeft => &[BackLeft],
            BufferMode::FrontRight => &[FrontRight],
            BufferMode::BackRight => &[BackRight],
            BufferMode::Front => &[FrontLeft, FrontRight],
            BufferMode::Back => &[BackLeft, BackRight],
            BufferMode::Left => &[FrontLeft, BackLeft],
            BufferMode::Right => &[FrontRight, BackRight],
            BufferMode::FrontAndBack => &[FrontLeft, BackLeft, FrontRight, BackRight],
            BufferMode::None => &[],
        }
    }

    /// The single logical buffer this mode selects for reading
    pub fn read_source(self) -> Option<LogicalBuffer> {
        match self {
            BufferMode::Front | BufferMode::Left | BufferMode::FrontLeft => {
                Some(LogicalBuffer::FrontLeft)
            }
            BufferMode::Back | BufferMode::BackLeft => Some(LogicalBuffer::BackLeft),
            BufferMode::Right | BufferMode::FrontRight => Some(LogicalBuffer::FrontRight),
            BufferMode::BackRight => Some(LogicalBuffer::BackRight),
            BufferMode::FrontAndBack | BufferMode::None => None,
        }
    }

    /// True for right-eye reads (the autotest uses a separate slot for these)
    pub fn is_right_eye_read(self) -> bool {
        matches!(self, BufferMode::FrontRight | BufferMode::BackRight)
    }
}

/// Layout of pixels transferred from the GPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferFormat {
    Rgb,
    Rgba,
    Bgr,
    Bgra,
    Abgr,
    Red,
    Green,
    Blue,
}

impl TransferFormat {
    /// Channel-isolation variants fold to a single representative
    pub fn canonical(self) -> Self {
        match self {
            TransferFormat::Green | TransferFormat::Blue => TransferFormat::Red,
            other => other,
        }
    }

    pub fn components(self) -> usize {
        match self {
            TransferFormat::Rgb | TransferFormat::Bgr => 3,
            TransferFormat::Rgba | TransferFormat::Bgra | TransferFormat::Abgr => 4,
            TransferFormat::Red | TransferFormat::Green | TransferFormat::Blue => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TransferFormat::Rgb => "RGB",
            TransferFormat::Rgba => "RGBA",
            TransferFormat::Bgr => "BGR",
            TransferFormat::Bgra => "BGRA",
            TransferFormat::Abgr => "ABGR",
            TransferFormat::Red | TransferFormat::Green | TransferFormat::Blue => "COMPONENT",
        }
    }

    /// Same channel order with the alpha channel dropped or added
    pub fn alpha_counterpart(self) -> Option<Self> {
        match self {
            TransferFormat::Rgb => Some(TransferFormat::Rgba),
            TransferFormat::Rgba => Some(TransferFormat::Rgb),
            TransferFormat::Bgr => Some(TransferFormat::Bgra),
            TransferFormat::Bgra => Some(TransferFormat::Bgr),
            _ => None,
        }
    }
}

impl fmt::Display for TransferFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Component data type of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    UnsignedByte,
    UnsignedInt8888,
    UnsignedInt8888Rev,
    UnsignedInt2101010Rev,
    UnsignedInt1010102,
}

impl DataType {
    pub fn is_packed(self) -> bool {
        !matches!(self, DataType::UnsignedByte)
    }
}

/// Bytes one pixel occupies in host memory for a given transfer
pub fn bytes_per_pixel(format: TransferFormat, ty: DataType) -> usize {
    if ty.is_packed() {
        4
    } else {
        format.components()
    }
}

/// Abstract pixel formats requested by the transport layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    Rgb,
    Rgbx,
    Rgb10X2,
    Bgr,
    Bgrx,
    Bgr10X2,
    Xbgr,
    Xbgr10X2,
    Xrgb,
    Xrgb10X2,
    Comp,
}

impl PixelFormat {
    pub const ALL: [PixelFormat; 11] = [
        PixelFormat::Rgb,
        PixelFormat::Rgbx,
        PixelFormat::Rgb10X2,
        PixelFormat::Bgr,
        PixelFormat::Bgrx,
        PixelFormat::Bgr10X2,
        PixelFormat::Xbgr,
        PixelFormat::Xbgr10X2,
        PixelFormat::Xrgb,
        PixelFormat::Xrgb10X2,
        PixelFormat::Comp,
    ];

    /// Case-insensitive lookup by [`name`](Self::name)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|pf| pf.name().eq_ignore_ascii_case(name.trim()))
    }

    pub fn size(self) -> usize {
        match self {
            PixelFormat::Rgb | PixelFormat::Bgr => 3,
            PixelFormat::Comp => 1,
            _ => 4,
        }
    }

    /// Native transfer format and data type that produce this layout
    /// directly in host memory (little-endian byte order).
    pub fn transfer(self) -> (TransferFormat, DataType) {
        match self {
            PixelFormat::Rgb => (TransferFormat::Rgb, DataType::UnsignedByte),
            PixelFormat::Rgbx => (TransferFormat::Rgba, DataType::UnsignedByte),
            PixelFormat::Rgb10X2 => (TransferFormat::Rgba, DataType::UnsignedInt2101010Rev),
            PixelFormat::Bgr => (TransferFormat::Bgr, DataType::UnsignedByte),
            PixelFormat::Bgrx => (TransferFormat::Bgra, DataType::UnsignedByte),
            PixelFormat::Bgr10X2 => (TransferFormat::Bgra, DataType::UnsignedInt2101010Rev),
            PixelFormat::Xbgr => (TransferFormat::Rgba, DataType::UnsignedInt8888),
            PixelFormat::Xbgr10X2 => (TransferFormat::Rgba, DataType::UnsignedInt1010102),
            PixelFormat::Xrgb => (TransferFormat::Bgra, DataType::UnsignedInt8888),
            PixelFormat::Xrgb10X2 => (TransferFormat::Bgra, DataType::UnsignedInt1010102),
            PixelFormat::Comp => (TransferFormat::Red, DataType::UnsignedByte),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Rgb => "RGB",
            PixelFormat::Rgbx => "RGBX",
            PixelFormat::Rgb10X2 => "RGB10_X2",
            PixelFormat::Bgr => "BGR",
            PixelFormat::Bgrx => "BGRX",
            PixelFormat::Bgr10X2 => "BGR10_X2",
            PixelFormat::Xbgr => "XBGR",
            PixelFormat::Xbgr10X2 => "XBGR10_X2",
            PixelFormat::Xrgb => "XRGB",
            PixelFormat::Xrgb10X2 => "XRGB10_X2",
            PixelFormat::Comp => "COMP",
        }
    }
}

impl FromStr for PixelFormat {
    type Err = SurfaceError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Self::from_name(name)
            .ok_or_else(|| SurfaceError::UnsupportedFormat(name.trim().to_string()))
    }
}

/// Rectangle in surface coordinates (origin bottom-left, like the GL)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_buffers_follow_config_bits() {
        let mono = FbConfig::rgba8(1);
        assert_eq!(
            mono.enabled_buffers().collect::<Vec<_>>(),
            vec![LogicalBuffer::FrontLeft]
        );

        let db = FbConfig::rgba8(1).with_double_buffer(true);
        assert_eq!(
            db.enabled_buffers().collect::<Vec<_>>(),
            vec![LogicalBuffer::FrontLeft, LogicalBuffer::BackLeft]
        );

        let stereo = FbConfig::rgba8(1).with_stereo(true);
        assert_eq!(
            stereo.enabled_buffers().collect::<Vec<_>>(),
            vec![LogicalBuffer::FrontLeft, LogicalBuffer::FrontRight]
        );

        let quad = FbConfig::rgba8(1).with_double_buffer(true).with_stereo(true);
        assert_eq!(quad.enabled_buffers().count(), 4);
        assert_eq!(quad.logical_buffer_count(), 4);
    }

    #[test]
    fn has_buffer_matches_enabled_buffers() {
        for db in [false, true] {
            for stereo in [false, true] {
                let config = FbConfig::rgb8(3).with_double_buffer(db).with_stereo(stereo);
                for buffer in LogicalBuffer::ALL {
                    let enabled = config.enabled_buffers().any(|b| b == buffer);
                    assert_eq!(config.has_buffer(buffer), enabled, "{:?}", buffer);
                }
            }
        }
    }

    #[test]
    fn storage_formats() {
        assert_eq!(FbConfig::rgb8(1).color_storage(), StorageFormat::Rgb8);
        assert_eq!(FbConfig::rgba8(1).color_storage(), StorageFormat::Rgba8);
        let deep = FbConfig {
            red_size: 10,
            green_size: 10,
            blue_size: 10,
            alpha_size: 2,
            ..FbConfig::rgb8(1)
        };
        assert_eq!(deep.color_storage(), StorageFormat::Rgb10A2);
        assert_eq!(FbConfig::rgb8(1).depth_storage(), None);
        assert_eq!(
            FbConfig::rgb8(1).with_depth(24, 8).depth_storage(),
            Some(StorageFormat::Depth24Stencil8)
        );
    }

    #[test]
    fn canonical_folds_channel_isolation() {
        assert_eq!(TransferFormat::Green.canonical(), TransferFormat::Red);
        assert_eq!(TransferFormat::Blue.canonical(), TransferFormat::Red);
        assert_eq!(TransferFormat::Bgra.canonical(), TransferFormat::Bgra);
    }

    #[test]
    fn pixel_format_table_sizes_agree() {
        for pf in PixelFormat::ALL {
            let (format, ty) = pf.transfer();
            assert_eq!(bytes_per_pixel(format, ty), pf.size(), "{}", pf.name());
            assert_eq!(PixelFormat::from_name(&pf.name().to_lowercase()), Some(pf));
        }
        assert_eq!(PixelFormat::from_name("YUV"), None);
    }

    #[test]
    fn unknown_pixel_format_names_are_unsupported() {
        assert_eq!(" xrgb10_x2 ".parse::<PixelFormat>(), Ok(PixelFormat::Xrgb10X2));
        let err = "YUV420".parse::<PixelFormat>().unwrap_err();
        assert_eq!(err, SurfaceError::UnsupportedFormat("YUV420".into()));
        assert_eq!(err.to_string(), "unsupported pixel format: YUV420");
        assert!(!err.is_contract_violation());
    }

    #[test]
    fn read_source_of_front_and_back_is_none() {
        assert_eq!(BufferMode::FrontAndBack.read_source(), None);
        assert_eq!(BufferMode::Right.read_source(), Some(LogicalBuffer::FrontRight));
    }
}
