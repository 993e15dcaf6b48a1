//! Unsolicited indication routing.
//!
//! Lines that start with a registered prefix are handed to that prefix's
//! handler instead of the pending reply. At most one handler per prefix.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::protocol::Line;

// ============================================================================
// Types
// ============================================================================

/// Indication handler callback type.
///
/// Called on the event loop task; must not block.
pub type IndicationHandler = Arc<dyn Fn(Indication) + Send + Sync>;

// ============================================================================
// Indication
// ============================================================================

/// An unsolicited line routed to a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indication {
    /// Registered prefix that matched.
    pub prefix: String,
    /// The full line.
    pub line: Line,
}

impl Indication {
    /// Returns the line text after the prefix, trimmed.
    #[must_use]
    pub fn payload(&self) -> String {
        let text = self.line.text();
        let trimmed = text.trim_start();
        trimmed
            .strip_prefix(self.prefix.as_str())
            .unwrap_or(trimmed)
            .trim()
            .to_string()
    }
}

// ============================================================================
// IndicationRegistry
// ============================================================================

/// Prefix to handler map.
#[derive(Default)]
pub struct IndicationRegistry {
    handlers: FxHashMap<String, IndicationHandler>,
}

impl IndicationRegistry {
    /// Creates an empty registry.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `prefix`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndicationInUse`] if the prefix is already taken, or
    /// [`Error::Config`] if it is empty.
    pub fn register(&mut self, prefix: &str, handler: IndicationHandler) -> Result<()> {
        if prefix.is_empty() {
            return Err(Error::config("indication prefix must not be empty"));
        }
        if self.handlers.contains_key(prefix) {
            return Err(Error::IndicationInUse {
                prefix: prefix.to_string(),
            });
        }
        self.handlers.insert(prefix.to_string(), handler);
        Ok(())
    }

    /// Removes the handler for `prefix`; returns `true` if one was registered.
    pub fn cancel(&mut self, prefix: &str) -> bool {
        self.handlers.remove(prefix).is_some()
    }

    /// Returns `true` if `prefix` has a handler.
    #[inline]
    #[must_use]
    pub fn contains(&self, prefix: &str) -> bool {
        self.handlers.contains_key(prefix)
    }

    /// Finds the handler for `line`; the longest matching prefix wins.
    ///
    /// Leading whitespace of the line is ignored. The returned handler is
    /// a clone so it can be called after the registry lock is released.
    #[must_use]
    pub fn route(&self, line: &Line) -> Option<(Indication, IndicationHandler)> {
        let text = line.text();
        let trimmed = text.trim_start();

        self.handlers
            .iter()
            .filter(|(prefix, _)| trimmed.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(prefix, handler)| {
                let indication = Indication {
                    prefix: prefix.clone(),
                    line: line.clone(),
                };
                (indication, Arc::clone(handler))
            })
    }
}

impl fmt::Debug for IndicationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndicationRegistry")
            .field("prefixes", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
