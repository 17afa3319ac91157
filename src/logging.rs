//! Logging setup and one-shot diagnostics
//!
//! Everything in the crate logs through the `log` facade. Binaries call
//! [`init`] once to install `env_logger`; libraries embedding vsurf can
//! install any other logger instead.
//!
//! Some diagnostics must be printed at most once per surface (or once per
//! readback format epoch). [`OnceNotice`] is the gate for those.

use std::sync::atomic::{AtomicBool, Ordering};

/// Install `env_logger`, defaulting to `debug` when verbose and `info`
/// otherwise. `RUST_LOG` still wins. Calling this twice is harmless.
pub fn init(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .try_init();
}

/// A latch that lets exactly one caller through until reset
#[derive(Debug, Default)]
pub struct OnceNotice {
    fired: AtomicBool,
}

impl OnceNotice {
    pub const fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
        }
    }

    /// Returns true the first time it is called after construction or reset
    pub fn fire(&self) -> bool {
        !self.fired.swap(true, Ordering::AcqRel)
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.fired.store(false, Ordering::Release);
    }
}
