//! Opaque handle types
//!
//! The interception layer hands us raw integer handles for display
//! connections, 2D drawables, off-screen surfaces and contexts. Zero is the
//! null handle in every namespace.

use std::fmt;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident($repr:ty)) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub $repr);

        impl $name {
            pub const NULL: $name = $name(0);

            pub fn is_null(self) -> bool {
                self.0 == 0
            }

            pub fn raw(self) -> $repr {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{:x}", self.0)
            }
        }
    };
}

handle_type!(
    /// Connection to the display server that owns a 2D drawable
    ConnectionId(u64)
);
handle_type!(
    /// Application-visible 2D window or pixmap
    DrawableId(u64)
);
handle_type!(
    /// Off-screen 3D surface (pbuffer) or any other bindable drawable
    SurfaceHandle(u64)
);
handle_type!(
    /// Rendering context
    ContextId(u64)
);
handle_type!(
    /// Framebuffer object name
    FramebufferId(u32)
);
handle_type!(
    /// Renderbuffer object name
    RenderbufferId(u32)
);
handle_type!(
    /// Buffer object name (used for staged pixel transfer)
    BufferId(u32)
);
