//! Version string comparison
//!
//! A version is the sequence of digit runs found in its string: `"v19.10.5"`,
//! `"19.10.5 beta"` and `"19-10-5"` all read as `[19, 10, 5]`. Segments are
//! compared numerically at arbitrary length (no integer overflow) and the
//! shorter sequence is padded with zeros, so `"4.0"` equals `"4"`. A string
//! with no digits has no ordering against anything.

use std::cmp::Ordering;

/// Parsed version: digit runs without leading zeros, trailing zero segments removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    segments: Vec<String>,
}

impl Version {
    /// Parse a version string; `None` when it contains no digits
    pub fn parse(raw: &str) -> Option<Self> {
        let mut segments: Vec<String> = raw
            .split(|c: char| !c.is_ascii_digit())
            .filter(|run| !run.is_empty())
            .map(|run| {
                let stripped = run.trim_start_matches('0');
                if stripped.is_empty() {
                    "0".to_string()
                } else {
                    stripped.to_string()
                }
            })
            .collect();

        if segments.is_empty() {
            return None;
        }

        while segments.last().map(|s| s == "0").unwrap_or(false) {
            segments.pop();
        }

        Some(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

fn compare_segment(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        for i in 0..len {
            let a = self.segments.get(i).map(String::as_str).unwrap_or("0");
            let b = other.segments.get(i).map(String::as_str).unwrap_or("0");
            match compare_segment(a, b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare two version strings; `None` when either side has no digits
pub fn compare_versions(a: &str, b: &str) -> Option<Ordering> {
    Some(Version::parse(a)?.cmp(&Version::parse(b)?))
}

/// Whether a version string is usable for ordering
pub fn is_well_formed(raw: &str) -> bool {
    Version::parse(raw).is_some()
}
