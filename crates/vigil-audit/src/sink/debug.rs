//! Console sink for development.

use std::fmt;
use std::io::{self, Write};

use parking_lot::Mutex;

use super::AuditSink;
use crate::error::Result;
use crate::record::AuditRecord;

/// Writes a pretty-printed rendering of every record to a writer,
/// standard error by default.
pub struct DebugSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl fmt::Debug for DebugSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugSink").finish_non_exhaustive()
    }
}

impl Default for DebugSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugSink {
    /// Creates a sink writing to standard error.
    #[must_use]
    pub fn new() -> Self {
        Self::with_writer(io::stderr())
    }

    /// Creates a sink writing to `writer`.
    #[must_use]
    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }
}

impl AuditSink for DebugSink {
    fn name(&self) -> &str {
        "debug"
    }

    fn store(&self, record: &AuditRecord) -> Result<()> {
        let rendered = serde_json::to_string_pretty(record)?;
        let mut writer = self.writer.lock();
        writeln!(writer, "AUDIT_LOG: {rendered}")?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.writer.lock().flush()?;
        Ok(())
    }

    fn is_backpressure_tolerant(&self) -> bool {
        true
    }
}
