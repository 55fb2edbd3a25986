//! CLI theme and styling.

use chanhost_extensions::TrustState;
use colored::Colorize;

/// CLI theme configuration.
pub(crate) struct Theme;

impl Theme {
    /// Format a header.
    pub(crate) fn header(text: &str) -> String {
        format!("{}", text.bold().cyan())
    }

    /// Format a success message.
    pub(crate) fn success(text: &str) -> String {
        format!("{} {}", "✓".green(), text)
    }

    /// Format an error message.
    pub(crate) fn error(text: &str) -> String {
        format!("{} {}", "✗".red(), text.red())
    }

    /// Format a warning message.
    pub(crate) fn warning(text: &str) -> String {
        format!("{} {}", "!".yellow(), text.yellow())
    }

    /// Format an info message.
    pub(crate) fn info(text: &str) -> String {
        format!("{} {}", "i".blue(), text)
    }

    /// Format a dimmed message.
    pub(crate) fn dimmed(text: &str) -> String {
        format!("{}", text.dimmed())
    }

    /// Format a separator line.
    pub(crate) fn separator() -> String {
        "━".repeat(60).dimmed().to_string()
    }

    /// Format a trust state.
    pub(crate) fn trust(state: TrustState) -> String {
        match state {
            TrustState::Trusted => "trusted".green().to_string(),
            TrustState::Untrusted => "untrusted".yellow().to_string(),
            TrustState::Discarded => "discarded".red().to_string(),
        }
    }

    /// Format a fingerprint (shortened).
    pub(crate) fn fingerprint(fingerprint: &str) -> String {
        let short = fingerprint.get(..16).unwrap_or(fingerprint);
        format!("{}", short.cyan())
    }
}
