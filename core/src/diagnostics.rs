//! Structured warning channel
//!
//! Configuration mistakes and numeric trouble inside the animation loop
//! must never unwind past a tick. They are recorded here (and logged) so a
//! host can surface them, while the visualization keeps running in a
//! degraded form.
//!
//! Copyright (c) 2025 Mohammad Atashi <mohammadaliatashi@icloud.com>

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Retained entries; older ones are dropped first
pub const DIAGNOSTICS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,

    /// Dotted path of the node that reported, e.g. `root.left`
    pub source: String,

    pub message: String,
}

/// Shared, bounded log of diagnostics
///
/// Cloning yields a handle to the same log; the whole node tree of one
/// visualization reports into a single instance.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Rc<RefCell<VecDeque<Diagnostic>>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, severity: Severity, source: &str, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Info => info!("{}: {}", source, message),
            Severity::Warning => warn!("{}: {}", source, message),
        }
        let mut entries = self.entries.borrow_mut();
        if entries.len() == DIAGNOSTICS_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(Diagnostic {
            severity,
            source: source.to_owned(),
            message,
        });
    }

    pub fn warn(&self, source: &str, message: impl Into<String>) {
        self.report(Severity::Warning, source, message);
    }

    pub fn info(&self, source: &str, message: impl Into<String>) {
        self.report(Severity::Info, source, message);
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Snapshot of current entries, oldest first
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries.borrow().iter().cloned().collect()
    }

    pub fn warnings(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_clones_share_one_log() {
        let diagnostics = Diagnostics::new();
        let handle = diagnostics.clone();
        handle.warn("root.left", "bad shape");
        diagnostics.info("root", "rebuilt");
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics.warnings(), 1);
        assert_eq!(diagnostics.entries()[0].source, "root.left");
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let diagnostics = Diagnostics::new();
        for n in 0..DIAGNOSTICS_CAPACITY + 5 {
            diagnostics.warn("root", format!("entry {}", n));
        }
        let entries = diagnostics.entries();
        assert_eq!(entries.len(), DIAGNOSTICS_CAPACITY);
        assert_eq!(entries[0].message, "entry 5");
        diagnostics.clear();
        assert!(diagnostics.is_empty());
    }
}
