//! Handle registries
//!
//! Side lookup tables for metadata the graphics runtime cannot tell us:
//! which display connection and framebuffer config an off-screen drawable
//! belongs to, which events the application selected on it, and which
//! application contexts are still alive.
//!
//! Both registries serialize every operation under their own lock. They are
//! owned by [`crate::runtime::Runtime`] rather than living in a global, and
//! are never called while a surface lock is held.

use crate::error::{Result, SurfaceError};
use crate::format::{FbConfig, FbConfigId};
use crate::handle::{ConnectionId, ContextId, SurfaceHandle};
use log::trace;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Out-of-band metadata for one off-screen drawable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawableRecord {
    pub connection: ConnectionId,
    pub config: Option<FbConfig>,
    pub event_mask: u64,
}

/// Maps off-screen drawables to the connection and config they were created for
#[derive(Debug, Default)]
pub struct DrawableRegistry {
    records: Mutex<HashMap<SurfaceHandle, DrawableRecord>>,
}

impl DrawableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a drawable, replacing any record it already had
    pub fn add(
        &self,
        drawable: SurfaceHandle,
        connection: ConnectionId,
        config: Option<FbConfig>,
    ) -> Result<()> {
        if drawable.is_null() {
            return Err(SurfaceError::InvalidArgument("null drawable handle"));
        }
        if connection.is_null() {
            return Err(SurfaceError::InvalidArgument("null connection handle"));
        }

        trace!("registering drawable {} on connection {}", drawable, connection);
        self.records.lock().insert(
            drawable,
            DrawableRecord {
                connection,
                config,
                event_mask: 0,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, drawable: SurfaceHandle) -> Option<DrawableRecord> {
        self.records.lock().get(&drawable).cloned()
    }

    pub fn connection(&self, drawable: SurfaceHandle) -> Option<ConnectionId> {
        self.records.lock().get(&drawable).map(|r| r.connection)
    }

    pub fn config(&self, drawable: SurfaceHandle) -> Option<FbConfig> {
        self.records
            .lock()
            .get(&drawable)
            .and_then(|r| r.config.clone())
    }

    /// Does nothing for unknown drawables
    pub fn set_event_mask(&self, drawable: SurfaceHandle, mask: u64) {
        if let Some(record) = self.records.lock().get_mut(&drawable) {
            record.event_mask = mask;
        }
    }

    /// Zero for unknown drawables
    pub fn event_mask(&self, drawable: SurfaceHandle) -> u64 {
        self.records
            .lock()
            .get(&drawable)
            .map(|r| r.event_mask)
            .unwrap_or(0)
    }

    pub fn remove(&self, drawable: SurfaceHandle) {
        if self.records.lock().remove(&drawable).is_some() {
            trace!("unregistered drawable {}", drawable);
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

/// What we remember about an application-created context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextRecord {
    pub config: FbConfigId,
    pub direct: bool,
}

/// Live application contexts.
///
/// A context leaves this table the moment the application destroys it,
/// which is how the binder knows not to restore a dead context.
#[derive(Debug, Default)]
pub struct ContextRegistry {
    contexts: Mutex<HashMap<ContextId, ContextRecord>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, context: ContextId, config: FbConfigId, direct: bool) -> Result<()> {
        if context.is_null() {
            return Err(SurfaceError::InvalidArgument("null context handle"));
        }
        self.contexts
            .lock()
            .insert(context, ContextRecord { config, direct });
        Ok(())
    }

    pub fn contains(&self, context: ContextId) -> bool {
        !context.is_null() && self.contexts.lock().contains_key(&context)
    }

    pub fn config(&self, context: ContextId) -> Option<FbConfigId> {
        self.contexts.lock().get(&context).map(|r| r.config)
    }

    pub fn is_direct(&self, context: ContextId) -> Option<bool> {
        self.contexts.lock().get(&context).map(|r| r.direct)
    }

    pub fn remove(&self, context: ContextId) {
        self.contexts.lock().remove(&context);
    }
}
