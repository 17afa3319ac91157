//! Process-level context
//!
//! One [`Runtime`] exists per process. It owns the graphics platform, the
//! effective configuration, both handle registries and the autotest slots,
//! and is shared as `Arc<Runtime>` by every virtual surface. Nothing in the
//! crate reaches for process globals.

use crate::autotest::AutotestSlots;
use crate::config::VsurfConfig;
use crate::error::{Result, SurfaceError};
use crate::format::FbConfig;
use crate::handle::{ConnectionId, ContextId};
use crate::platform::Platform;
use crate::registry::{ContextRegistry, DrawableRegistry};
use log::{debug, info};
use std::sync::Arc;

pub struct Runtime {
    platform: Arc<dyn Platform>,
    config: VsurfConfig,
    drawables: DrawableRegistry,
    contexts: ContextRegistry,
    autotest: AutotestSlots,
}

impl Runtime {
    pub fn new(platform: Arc<dyn Platform>, config: VsurfConfig) -> Arc<Self> {
        info!(
            "vsurf runtime: readback={:?}, emulate_multibuffer={}",
            config.readback.mode, config.surface.emulate_multibuffer
        );
        Arc::new(Self {
            platform,
            config,
            drawables: DrawableRegistry::new(),
            contexts: ContextRegistry::new(),
            autotest: AutotestSlots::new(),
        })
    }

    pub fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    /// Owned handle to the platform, for objects that outlive a borrow
    pub fn shared_platform(&self) -> Arc<dyn Platform> {
        Arc::clone(&self.platform)
    }

    pub fn config(&self) -> &VsurfConfig {
        &self.config
    }

    pub fn drawables(&self) -> &DrawableRegistry {
        &self.drawables
    }

    pub fn contexts(&self) -> &ContextRegistry {
        &self.contexts
    }

    pub fn autotest(&self) -> &AutotestSlots {
        &self.autotest
    }

    /// Create an application context and remember it as live
    pub fn create_context(
        &self,
        connection: ConnectionId,
        config: &FbConfig,
        direct: bool,
    ) -> Result<ContextId> {
        let context = self
            .platform
            .create_context(connection, config, direct)
            .ok_or_else(|| {
                SurfaceError::Platform(format!("could not create context for config {}", config.id))
            })?;
        self.contexts.add(context, config.id, direct)?;
        debug!("application context {} (config {}, direct={})", context, config.id, direct);
        Ok(context)
    }

    /// Forget an application context, then destroy it
    pub fn destroy_context(&self, context: ContextId) {
        self.contexts.remove(context);
        self.platform.destroy_context(context);
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("drawables", &self.drawables.len())
            .finish_non_exhaustive()
    }
}
