//! Batched user-facing messages
//!
//! Solvers push short notes (timings, recovered missing assets) while they
//! run; the host flushes them once per logical operation and shows a single
//! aggregated report.

use tracing::{error, info};

/// Aggregated messages of one operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub info: Vec<String>,
    pub errors: Vec<String>,
}

impl Report {
    /// True when the operation produced no messages
    pub fn is_empty(&self) -> bool {
        self.info.is_empty() && self.errors.is_empty()
    }

    /// True when at least one error was recorded
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Info messages joined into one line
    pub fn info_text(&self) -> String {
        self.info.join(" ")
    }

    /// Error messages joined into one line
    pub fn error_text(&self) -> String {
        self.errors.join(" ")
    }
}

/// Pending info and error messages
#[derive(Debug, Default)]
pub struct MessageLog {
    pending: Report,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an informational message
    pub fn info(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.pending.info.push(message);
    }

    /// Record an error message
    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.pending.errors.push(message);
    }

    /// Take everything recorded since the last flush
    pub fn flush(&mut self) -> Report {
        std::mem::take(&mut self.pending)
    }

    /// Messages recorded since the last flush
    pub fn pending(&self) -> &Report {
        &self.pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_batches_and_clears() {
        let mut log = MessageLog::new();
        log.info("Thermal: 12 ms.");
        log.info("Hardness image missing, using uniform hardness.");
        log.error("Color image missing.");

        let report = log.flush();
        assert_eq!(report.info.len(), 2);
        assert!(report.has_errors());
        assert_eq!(
            report.info_text(),
            "Thermal: 12 ms. Hardness image missing, using uniform hardness."
        );
        assert!(log.flush().is_empty());
    }
}
