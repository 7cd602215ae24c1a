//! Bounded, ordered operation log of a room.

use crate::types::Operation;

/// When the log grows past `max_len` entries it is cut back to the most
/// recent `retain` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogLimits {
    pub max_len: usize,
    pub retain: usize,
}

impl Default for LogLimits {
    fn default() -> Self {
        Self {
            max_len: 1000,
            retain: 500,
        }
    }
}

/// The durable (non-ephemeral) operations of a room in arrival order.
///
/// # Invariants
///
/// - Entries are in server arrival order.
/// - Ephemeral operations are never appended.
/// - After any append or trim, `len() <= limits.max_len`.
#[derive(Debug, Clone)]
pub struct OperationLog {
    entries: Vec<Operation>,
    limits: LogLimits,
}

impl OperationLog {
    pub fn new(limits: LogLimits) -> Self {
        Self {
            entries: Vec::new(),
            limits,
        }
    }

    /// Append a durable operation, trimming when the cap is exceeded.
    pub fn append(&mut self, operation: Operation) {
        debug_assert!(!operation.payload.is_ephemeral());
        self.entries.push(operation);
        self.trim();
    }

    /// Drop the oldest entries if the log is over its cap.
    ///
    /// Returns the number of entries discarded.
    pub fn trim(&mut self) -> usize {
        if self.entries.len() <= self.limits.max_len {
            return 0;
        }
        let excess = self.entries.len().saturating_sub(self.limits.retain);
        self.entries.drain(..excess);
        excess
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Operation] {
        &self.entries
    }

    pub fn to_vec(&self) -> Vec<Operation> {
        self.entries.clone()
    }
}
