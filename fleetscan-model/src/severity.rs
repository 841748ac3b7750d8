use std::{fmt, ops::AddAssign};

/// Vulnerability severity buckets reported by the scan payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    /// Label used by the payload output, e.g. `Critical: 2`.
    pub fn label(self) -> &'static str {
        match self {
            Severity::Critical => "Critical",
            Severity::High => "High",
            Severity::Medium => "Medium",
            Severity::Low => "Low",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|severity| severity.label().eq_ignore_ascii_case(label))
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-severity vulnerability tallies extracted from one target's output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SeverityCounts {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl SeverityCounts {
    pub fn new(critical: u32, high: u32, medium: u32, low: u32) -> Self {
        Self {
            critical,
            high,
            medium,
            low,
        }
    }

    pub fn get(&self, severity: Severity) -> u32 {
        match severity {
            Severity::Critical => self.critical,
            Severity::High => self.high,
            Severity::Medium => self.medium,
            Severity::Low => self.low,
        }
    }

    pub fn set(&mut self, severity: Severity, value: u32) {
        match severity {
            Severity::Critical => self.critical = value,
            Severity::High => self.high = value,
            Severity::Medium => self.medium = value,
            Severity::Low => self.low = value,
        }
    }

    pub fn total(&self) -> u64 {
        u64::from(self.critical)
            + u64::from(self.high)
            + u64::from(self.medium)
            + u64::from(self.low)
    }
}

impl AddAssign for SeverityCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.critical = self.critical.saturating_add(rhs.critical);
        self.high = self.high.saturating_add(rhs.high);
        self.medium = self.medium.saturating_add(rhs.medium);
        self.low = self.low.saturating_add(rhs.low);
    }
}

impl std::iter::Sum for SeverityCounts {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(SeverityCounts::default(), |mut acc, counts| {
            acc += counts;
            acc
        })
    }
}
