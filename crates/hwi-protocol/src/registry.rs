//! Frame handler registry.
//!
//! Maps each [`FrameKind`] to the one handler that consumes frames of that
//! kind. Handlers are registered during startup, before the registry is
//! handed to a protocol client; frames of kinds nobody registered for are
//! dropped.
//!
//! # Example
//!
//! ```
//! use hwi_protocol::{DecodedFrame, FrameKind, FrameRegistry};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! let seen = Arc::new(AtomicU64::new(0));
//! let counter = Arc::clone(&seen);
//!
//! let mut registry = FrameRegistry::new();
//! registry.register(FrameKind::DimLevel, move |frame| {
//!     counter.store(frame.counter, Ordering::SeqCst);
//! });
//!
//! let frame = DecodedFrame::new(FrameKind::DimLevel, 7, vec![]);
//! assert!(registry.dispatch(&frame));
//! assert_eq!(seen.load(Ordering::SeqCst), 7);
//! ```

use crate::{DecodedFrame, FrameKind};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Shared frame handler.
pub type FrameHandler = Arc<dyn Fn(&DecodedFrame) + Send + Sync>;

#[derive(Clone, Default)]
pub struct FrameRegistry {
    handlers: HashMap<FrameKind, FrameHandler>,
}

impl FrameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `kind`. The last registration wins; the
    /// replaced handler, if any, is returned.
    pub fn register<F>(&mut self, kind: FrameKind, handler: F) -> Option<FrameHandler>
    where
        F: Fn(&DecodedFrame) + Send + Sync + 'static,
    {
        self.handlers.insert(kind, Arc::new(handler))
    }

    /// Deliver a frame to its handler. Returns `false` if none is registered.
    pub fn dispatch(&self, frame: &DecodedFrame) -> bool {
        match self.handlers.get(&frame.kind) {
            Some(handler) => {
                handler(frame);
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, kind: FrameKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for FrameRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FrameRegistry")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
