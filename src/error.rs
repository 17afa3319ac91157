//! Error taxonomy for the surface manager and readback pipeline
//!
//! Every fatal condition surfaces as a [`SurfaceError`]. Contract violations,
//! platform capability gaps and driver-reported errors are all fatal to the
//! operation that raised them. Heuristic demotion of staged readback and
//! render-mode skips are not errors at all and never show up here.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, SurfaceError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SurfaceError {
    /// A null handle, zero dimension or otherwise malformed argument
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The surface has no pixel format or direct mode yet
    #[error("virtual surface has not been fully initialized")]
    NotInitialized,

    /// The platform lacks something this subsystem cannot work without
    #[error("platform capability missing: {0}")]
    Capability(String),

    /// The graphics runtime reported one or more error codes after a call
    #[error("could not {operation} (GL error {})", format_codes(.codes))]
    Driver {
        operation: &'static str,
        codes: Vec<u32>,
    },

    /// A pixel format name no transfer format exists for
    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    /// A window-system level call failed
    #[error("{0}")]
    Platform(String),
}

impl SurfaceError {
    /// True for errors caused by the caller rather than the platform
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            SurfaceError::InvalidArgument(_) | SurfaceError::NotInitialized
        )
    }
}

fn format_codes(codes: &[u32]) -> String {
    codes
        .iter()
        .map(|code| format!("0x{:04x}", code))
        .collect::<Vec<_>>()
        .join(", ")
}
