//! Print-session tracking.
//!
//! A `ReprAccumulator` collects output text and remembers which container
//! identities are currently being printed, so shared or self-referential
//! structures print a placeholder instead of recursing forever.

use core::fmt;
use core::ops::{Deref, DerefMut};
use hashbrown::HashSet;

#[derive(Debug, Default)]
pub struct ReprAccumulator {
    out: String,
    in_progress: HashSet<usize>,
}

impl ReprAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `identity` as being printed. Returns false if it already is.
    pub fn begin_or_skip(&mut self, identity: usize) -> bool {
        self.in_progress.insert(identity)
    }

    /// Unregister `identity`.
    pub fn end(&mut self, identity: usize) {
        self.in_progress.remove(&identity);
    }

    pub fn is_printing(&self, identity: usize) -> bool {
        self.in_progress.contains(&identity)
    }

    /// Enter a print scope for `identity`, or `None` if that identity is
    /// already being printed further up the stack. The registration ends
    /// when the scope drops.
    pub fn enter(&mut self, identity: usize) -> Option<ReprScope<'_>> {
        if self.begin_or_skip(identity) {
            Some(ReprScope {
                acc: self,
                identity,
            })
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    pub fn into_string(self) -> String {
        self.out
    }
}

impl fmt::Write for ReprAccumulator {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.out.push_str(s);
        Ok(())
    }
}

/// RAII registration returned by `ReprAccumulator::enter`.
pub struct ReprScope<'a> {
    acc: &'a mut ReprAccumulator,
    identity: usize,
}

impl Deref for ReprScope<'_> {
    type Target = ReprAccumulator;

    fn deref(&self) -> &ReprAccumulator {
        self.acc
    }
}

impl DerefMut for ReprScope<'_> {
    fn deref_mut(&mut self) -> &mut ReprAccumulator {
        self.acc
    }
}

impl Drop for ReprScope<'_> {
    fn drop(&mut self) {
        self.acc.end(self.identity);
    }
}
