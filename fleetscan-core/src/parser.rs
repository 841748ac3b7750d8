//! Turns free-form scan payload output into severity counts.

use std::sync::LazyLock;

use fleetscan_model::{Severity, SeverityCounts};
use regex::Regex;

/// Pluggable `raw output -> severity counts` conversion. Implementations must
/// never fail: output they cannot read yields all-zero counts.
pub trait SeverityParser: Send + Sync {
    fn parse(&self, raw: &str) -> SeverityCounts;
}

static SEVERITY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^\s*(critical|high|medium|low)\s*:\s*(\d+)\s*$")
        .expect("severity line pattern is valid")
});

/// Reads lines of the form `Critical: 2`. Missing severities stay 0, the
/// first line for a severity wins, and counts too large for `u32` are
/// ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineSeverityParser;

impl SeverityParser for LineSeverityParser {
    fn parse(&self, raw: &str) -> SeverityCounts {
        let mut counts = SeverityCounts::default();
        let mut seen = [false; Severity::ALL.len()];

        for caps in SEVERITY_LINE.captures_iter(raw) {
            let Some(severity) = Severity::from_label(&caps[1]) else {
                continue;
            };
            let slot = severity as usize;
            if seen[slot] {
                continue;
            }
            if let Ok(value) = caps[2].parse::<u32>() {
                counts.set(severity, value);
                seen[slot] = true;
            }
        }

        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> SeverityCounts {
        LineSeverityParser.parse(raw)
    }

    #[test]
    fn reads_all_four_severities() {
        let counts = parse("Critical: 2\nHigh: 0\nMedium: 3\nLow: 1\n");
        assert_eq!(counts, SeverityCounts::new(2, 0, 3, 1));
    }

    #[test]
    fn output_without_matching_lines_is_all_zero() {
        assert_eq!(parse("scan finished, nothing to report"), SeverityCounts::default());
        assert_eq!(parse(""), SeverityCounts::default());
    }

    #[test]
    fn missing_severities_default_to_zero_amid_noise() {
        let raw = "== audit v2 ==\nchecking packages...\nHigh: 4\ndone\n";
        assert_eq!(parse(raw), SeverityCounts::new(0, 4, 0, 0));
    }

    #[test]
    fn tolerates_case_and_whitespace_and_crlf() {
        let raw = "  critical :  7 \r\nLOW:1\r\n";
        assert_eq!(parse(raw), SeverityCounts::new(7, 0, 0, 1));
    }

    #[test]
    fn malformed_values_are_ignored() {
        let raw = "Critical: many\nHigh: -3\nMedium: 3.5\nLow: 99999999999\n";
        assert_eq!(parse(raw), SeverityCounts::default());
    }

    #[test]
    fn first_occurrence_wins() {
        let raw = "High: 2\nsummary follows\nHigh: 9\n";
        assert_eq!(parse(raw).high, 2);
    }
}
