//! Ordered keys for raw version strings.
//!
//! A [`VersionKey`] splits a version on `.` and `-` and tags every token as
//! numeric or textual. Keys compare element-wise; at the same position a
//! numeric segment always sorts before a textual one, and a key that is a
//! strict prefix of another sorts first.
//!
//! The ordering is only used to pick the newest of several observed versions
//! of one package. It is not a general release-ordering implementation.

use std::cmp::Ordering;

/// One `.`/`-` delimited token of a version string.
///
/// At the same position every `Numeric` sorts before every `Text`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// All-digit token of any width, stored without leading zeros.
    Numeric(String),
    /// Any other token, original casing retained.
    Text(String),
}

impl Segment {
    fn classify(token: &str) -> Self {
        if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
            let digits = token.trim_start_matches('0');
            let digits = if digits.is_empty() { "0" } else { digits };
            Segment::Numeric(digits.to_string())
        } else {
            Segment::Text(token.to_string())
        }
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            // no leading zeros, so the longer digit string is the larger number
            (Segment::Numeric(a), Segment::Numeric(b)) => {
                a.len().cmp(&b.len()).then_with(|| a.cmp(b))
            }
            (Segment::Numeric(_), Segment::Text(_)) => Ordering::Less,
            (Segment::Text(_), Segment::Numeric(_)) => Ordering::Greater,
            (Segment::Text(a), Segment::Text(b)) => a.cmp(b),
        }
    }
}

/// Comparable key derived from a raw version string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionKey {
    segments: Vec<Segment>,
}

impl VersionKey {
    /// Build a key from any string. Never fails: strings without digits
    /// simply produce an all-textual key.
    pub fn parse(raw: &str) -> Self {
        let segments = raw.split(['.', '-']).map(Segment::classify).collect();
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl PartialOrd for VersionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.segments.cmp(&other.segments)
    }
}

/// Pick the greatest version by [`VersionKey`]. On ties the earliest
/// candidate wins, so the result is stable for a given input order.
pub fn max_version<'a, I>(versions: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(&'a str, VersionKey)> = None;
    for candidate in versions {
        let key = VersionKey::parse(candidate);
        match &best {
            Some((_, best_key)) if key <= *best_key => {}
            _ => best = Some((candidate, key)),
        }
    }
    best.map(|(v, _)| v)
}
