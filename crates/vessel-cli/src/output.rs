//! Formatted output helpers for CLI commands.
//!
//! Provides consistent table cells, error reports with hints, and
//! human-readable timestamps.

use vessel_common::error::VesselError;

const BOLD: &str = "\x1b[1m";
const RED: &str = "\x1b[31m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Prints an error and its hint to stderr.
pub fn report_error(err: &VesselError) {
    eprintln!("{RED}{BOLD}error[{}]{RESET}: {err}", err.kind());
    if let Some(hint) = err.hint() {
        eprintln!("  {DIM}hint: {hint}{RESET}");
    }
}

/// Shortens `text` to `max` characters, marking the cut with `…`.
#[must_use]
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{kept}…")
}

/// Renders an optional value, `-` when absent.
#[must_use]
pub fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// Renders an RFC 3339 timestamp as local `YYYY-MM-DD HH:MM:SS`.
///
/// Unparseable values are shown as-is.
#[must_use]
pub fn format_timestamp(rfc3339: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(rfc3339).map_or_else(
        |_| rfc3339.to_string(),
        |t| {
            t.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate("echo hi", 20), "echo hi");
    }

    #[test]
    fn truncate_marks_the_cut() {
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
        assert_eq!(truncate("abcdefghij", 5).chars().count(), 5);
    }

    #[test]
    fn or_dash_fills_missing_values() {
        assert_eq!(or_dash(Some(42)), "42");
        assert_eq!(or_dash::<u32>(None), "-");
    }

    #[test]
    fn format_timestamp_falls_back_to_input() {
        assert_eq!(format_timestamp("yesterday"), "yesterday");
        assert_eq!(format_timestamp("2026-01-02T03:04:05+00:00").len(), 19);
    }
}
