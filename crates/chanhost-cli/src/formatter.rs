//! Output format selection.

/// How command output is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    /// Colored, human readable text.
    Pretty,
    /// One JSON document (or one JSON line per event).
    Json,
}
