//! Context pool
//!
//! LIFO free list of execution contexts. Hooks are installed once, when a
//! context is created, and stay for its whole lifetime.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::debug;

use crate::engine::{ContextFactory, ContextHooks, ScriptContext};

/// Thread-safe pool of reusable contexts.
pub struct ContextPool<C: ScriptContext> {
    free: Mutex<Vec<Box<C>>>,
    factory: ContextFactory<C>,
    hooks: ContextHooks,
    created: AtomicUsize,
}

impl<C: ScriptContext> ContextPool<C> {
    pub fn new(
        factory: ContextFactory<C>,
        hooks: ContextHooks,
    ) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            factory,
            hooks,
            created: AtomicUsize::new(0),
        }
    }

    /// Most recently released idle context, or a new one with hooks
    /// installed.
    pub fn acquire(&self) -> Box<C> {
        if let Some(ctx) = self.free.lock().pop() {
            return ctx;
        }

        let mut ctx = Box::new((self.factory)());
        ctx.install_hooks(self.hooks.clone());
        let total = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("context pool grew to {} contexts", total);
        ctx
    }

    /// Clear the context's call state and put it back on the free list.
    pub fn release(
        &self,
        mut ctx: Box<C>,
    ) {
        ctx.unprepare();
        self.free.lock().push(ctx);
    }

    /// Number of idle contexts.
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }

    /// Number of contexts ever created.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn hooks(&self) -> &ContextHooks {
        &self.hooks
    }

    /// Drop every idle context. Returns how many were dropped.
    pub fn drain(&self) -> usize {
        let drained = std::mem::take(&mut *self.free.lock());
        let count = drained.len();
        drop(drained);
        if count > 0 {
            debug!("dropped {} pooled contexts", count);
        }
        count
    }
}

impl<C: ScriptContext> std::fmt::Debug for ContextPool<C> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ContextPool")
            .field("idle", &self.idle())
            .field("created", &self.created())
            .finish()
    }
}
