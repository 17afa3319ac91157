//! Scoped context binding
//!
//! Readback and copy need a context of their own bound to the virtual
//! surface, without disturbing whatever the application had current.
//! [`ScopedBinding::acquire`] captures the current binding, binds the
//! requested one if it differs, and [`ScopedBinding::release`] (or `Drop`)
//! puts the old one back.
//!
//! The previous binding is restored only if its context was still a live
//! application context at the time we switched away from it. Applications
//! do destroy the current context before unbinding it, and rebinding a dead
//! context would fail or worse.

use crate::error::{Result, SurfaceError};
use crate::format::FbConfig;
use crate::handle::{ConnectionId, ContextId, SurfaceHandle};
use crate::platform::{CurrentBinding, Platform};
use crate::registry::ContextRegistry;
use crate::runtime::Runtime;
use log::{trace, warn};

/// Drawable argument to [`ScopedBinding::acquire`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindDrawable {
    /// Keep whatever is bound in that role now
    Existing,
    Handle(SurfaceHandle),
}

impl BindDrawable {
    fn resolve(self, current: SurfaceHandle) -> SurfaceHandle {
        match self {
            BindDrawable::Existing => current,
            BindDrawable::Handle(handle) => handle,
        }
    }
}

impl From<SurfaceHandle> for BindDrawable {
    fn from(handle: SurfaceHandle) -> Self {
        BindDrawable::Handle(handle)
    }
}

/// A temporarily bound (draw, read, context) triple
#[must_use = "the previous binding is restored when this is released or dropped"]
pub struct ScopedBinding<'a> {
    platform: &'a dyn Platform,
    previous: CurrentBinding,
    manufactured: Option<ContextId>,
    restore: bool,
}

impl<'a> ScopedBinding<'a> {
    /// Bind `context` to `draw`/`read`.
    ///
    /// With no context but both drawables and a config, a direct context is
    /// created for the duration of the binding. Nothing is rebound when the
    /// requested triple is already current.
    pub fn acquire(
        runtime: &'a Runtime,
        connection: ConnectionId,
        draw: BindDrawable,
        read: BindDrawable,
        context: Option<ContextId>,
        config: Option<&FbConfig>,
    ) -> Result<Self> {
        Self::acquire_with(
            runtime.platform(),
            runtime.contexts(),
            connection,
            draw,
            read,
            context,
            config,
        )
    }

    /// Same as [`acquire`](Self::acquire) with the platform and context
    /// registry passed separately
    pub fn acquire_with(
        platform: &'a dyn Platform,
        contexts: &ContextRegistry,
        connection: ConnectionId,
        draw: BindDrawable,
        read: BindDrawable,
        context: Option<ContextId>,
        config: Option<&FbConfig>,
    ) -> Result<Self> {
        let restore_previous = current_context_is_live(platform, contexts);
        Self::acquire_with_restore(
            platform,
            connection,
            draw,
            read,
            context,
            config,
            restore_previous,
        )
    }

    /// Same as [`acquire_with`](Self::acquire_with), with the restore
    /// decision made by the caller.
    ///
    /// `restore_previous` must come from [`current_context_is_live`] on this
    /// thread. Callers holding a lock of their own take the decision before
    /// locking, so the context registry is never locked underneath them.
    pub fn acquire_with_restore(
        platform: &'a dyn Platform,
        connection: ConnectionId,
        draw: BindDrawable,
        read: BindDrawable,
        context: Option<ContextId>,
        config: Option<&FbConfig>,
        restore_previous: bool,
    ) -> Result<Self> {
        let previous = platform.current();
        let draw = draw.resolve(previous.draw);
        let read = read.resolve(previous.read);

        let mut binding = ScopedBinding {
            platform,
            previous,
            manufactured: None,
            restore: false,
        };

        let mut context = context;
        if context.is_none() && !draw.is_null() && !read.is_null() {
            if let Some(config) = config {
                let created = platform
                    .create_context(connection, config, true)
                    .ok_or_else(|| {
                        SurfaceError::Platform("could not create temporary context".into())
                    })?;
                trace!("manufactured temporary context {}", created);
                binding.manufactured = Some(created);
                context = Some(created);
            }
        }

        let Some(ctx) = context else {
            return Ok(binding);
        };
        if draw.is_null() && read.is_null() {
            return Ok(binding);
        }
        if previous.draw == draw && previous.read == read && previous.context == Some(ctx) {
            return Ok(binding);
        }

        if !platform.make_current(connection, draw, read, Some(ctx)) {
            // binding drops here and destroys the manufactured context
            return Err(SurfaceError::Platform(format!(
                "could not bind context {} to drawables {}/{} (drawable may have disappeared)",
                ctx, draw, read
            )));
        }
        binding.restore = restore_previous && previous.context.is_some();
        Ok(binding)
    }

    /// Whether releasing will rebind the previous triple
    pub fn will_restore(&self) -> bool {
        self.restore
    }

    pub fn manufactured_context(&self) -> Option<ContextId> {
        self.manufactured
    }

    /// Rebind the previous triple if warranted and destroy any manufactured
    /// context. Safe to call more than once.
    pub fn release(&mut self) {
        if self.restore {
            self.restore = false;
            let previous = self.previous;
            if !self.platform.make_current(
                previous.connection,
                previous.draw,
                previous.read,
                previous.context,
            ) {
                warn!(
                    "could not restore context {:?} on drawables {}/{}",
                    previous.context, previous.draw, previous.read
                );
            }
        }
        if let Some(ctx) = self.manufactured.take() {
            self.platform.destroy_context(ctx);
        }
    }
}

/// True when the context current on this thread is a live application
/// context, i.e. one a [`ScopedBinding`] may rebind on release
pub fn current_context_is_live(platform: &dyn Platform, contexts: &ContextRegistry) -> bool {
    platform
        .current()
        .context
        .is_some_and(|ctx| contexts.contains(ctx))
}

impl Drop for ScopedBinding<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VsurfConfig;
    use crate::platform::headless::HeadlessPlatform;
    use std::sync::Arc;

    const CONN: ConnectionId = ConnectionId(1);

    struct Fixture {
        platform: Arc<HeadlessPlatform>,
        runtime: Arc<Runtime>,
        config: FbConfig,
        a: SurfaceHandle,
        b: SurfaceHandle,
    }

    fn fixture() -> Fixture {
        let platform = Arc::new(HeadlessPlatform::new());
        let runtime = Runtime::new(platform.clone(), VsurfConfig::default());
        let config = FbConfig::rgba8(1).with_double_buffer(true);
        let a = platform.create_pbuffer(CONN, &config, 4, 4).unwrap();
        let b = platform.create_pbuffer(CONN, &config, 4, 4).unwrap();
        Fixture {
            platform,
            runtime,
            config,
            a,
            b,
        }
    }

    #[test]
    fn restores_previous_binding_on_drop() {
        let f = fixture();
        let app = f.runtime.create_context(CONN, &f.config, true).unwrap();
        assert!(f.platform.make_current(CONN, f.a, f.a, Some(app)));
        let temp = f.platform.create_context(CONN, &f.config, true).unwrap();

        {
            let binding = ScopedBinding::acquire(
                &f.runtime,
                CONN,
                f.b.into(),
                f.b.into(),
                Some(temp),
                None,
            )
            .unwrap();
            assert!(binding.will_restore());
            assert_eq!(f.platform.current().context, Some(temp));
        }

        let current = f.platform.current();
        assert_eq!(current.context, Some(app));
        assert_eq!(current.draw, f.a);
    }

    #[test]
    fn identical_binding_is_not_rebound() {
        let f = fixture();
        let app = f.runtime.create_context(CONN, &f.config, true).unwrap();
        assert!(f.platform.make_current(CONN, f.a, f.a, Some(app)));
        f.platform.reset_calls();

        let binding = ScopedBinding::acquire(
            &f.runtime,
            CONN,
            BindDrawable::Existing,
            BindDrawable::Existing,
            Some(app),
            None,
        )
        .unwrap();
        assert!(!binding.will_restore());
        drop(binding);
        assert!(f.platform.calls().make_current.is_empty());
    }

    #[test]
    fn manufactures_and_destroys_context() {
        let f = fixture();
        let mut binding = ScopedBinding::acquire(
            &f.runtime,
            CONN,
            f.a.into(),
            f.a.into(),
            None,
            Some(&f.config),
        )
        .unwrap();
        let made = binding.manufactured_context().unwrap();
        assert_eq!(f.platform.current().context, Some(made));

        binding.release();
        binding.release();
        assert!(!f.platform.context_exists(made));
        assert_eq!(f.platform.calls().contexts_destroyed, vec![made]);
    }

    #[test]
    fn destroyed_previous_context_is_never_rebound() {
        let f = fixture();
        let app = f.runtime.create_context(CONN, &f.config, true).unwrap();
        assert!(f.platform.make_current(CONN, f.a, f.a, Some(app)));
        // The application destroys its context while it is still current
        f.runtime.destroy_context(app);

        let temp = f.platform.create_context(CONN, &f.config, true).unwrap();
        f.platform.reset_calls();
        let binding =
            ScopedBinding::acquire(&f.runtime, CONN, f.b.into(), f.b.into(), Some(temp), None)
                .unwrap();
        assert!(!binding.will_restore());
        drop(binding);

        let calls = f.platform.calls().make_current;
        assert_eq!(calls.len(), 1);
        assert!(calls.iter().all(|(_, _, ctx)| *ctx != Some(app)));
    }

    #[test]
    fn caller_decides_whether_to_restore() {
        let f = fixture();
        let app = f.runtime.create_context(CONN, &f.config, true).unwrap();
        assert!(f.platform.make_current(CONN, f.a, f.a, Some(app)));
        assert!(current_context_is_live(f.platform.as_ref(), f.runtime.contexts()));
        let temp = f.platform.create_context(CONN, &f.config, true).unwrap();

        // A live context is still left alone when the caller says so
        let binding = ScopedBinding::acquire_with_restore(
            f.platform.as_ref(),
            CONN,
            f.b.into(),
            f.b.into(),
            Some(temp),
            None,
            false,
        )
        .unwrap();
        assert!(!binding.will_restore());
        drop(binding);
        assert_eq!(f.platform.current().context, Some(temp));

        assert!(f.platform.make_current(CONN, f.a, f.a, Some(app)));
        let binding = ScopedBinding::acquire_with_restore(
            f.platform.as_ref(),
            CONN,
            f.b.into(),
            f.b.into(),
            Some(temp),
            None,
            true,
        )
        .unwrap();
        assert!(binding.will_restore());
        drop(binding);
        assert_eq!(f.platform.current().context, Some(app));
        assert_eq!(f.platform.current().draw, f.a);
    }

    #[test]
    fn unbound_thread_is_never_restored() {
        let f = fixture();
        assert!(!current_context_is_live(f.platform.as_ref(), f.runtime.contexts()));
        let temp = f.platform.create_context(CONN, &f.config, true).unwrap();
        let binding = ScopedBinding::acquire_with_restore(
            f.platform.as_ref(),
            CONN,
            f.b.into(),
            f.b.into(),
            Some(temp),
            None,
            true,
        )
        .unwrap();
        assert!(!binding.will_restore());
    }

    #[test]
    fn failed_bind_reports_and_cleans_up() {
        let f = fixture();
        f.platform.destroy_pbuffer(f.b);
        let count = f.platform.context_count();
        let err = ScopedBinding::acquire(
            &f.runtime,
            CONN,
            f.b.into(),
            f.b.into(),
            None,
            Some(&f.config),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("could not bind context"));
        assert_eq!(f.platform.context_count(), count);
    }

    #[test]
    fn nothing_to_bind_is_a_no_op() {
        let f = fixture();
        let binding = ScopedBinding::acquire(
            &f.runtime,
            CONN,
            BindDrawable::Existing,
            BindDrawable::Existing,
            None,
            Some(&f.config),
        )
        .unwrap();
        assert!(binding.manufactured_context().is_none());
        assert!(f.platform.calls().make_current.is_empty());
    }
}
