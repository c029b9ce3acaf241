//! Port range primitives (component C1).

use crate::error::{AegisError, Result};

/// An inclusive port range, optionally negated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortRange {
    pub lo: u16,
    pub hi: u16,
    pub negated: bool,
}

impl PortRange {
    pub const ANY: PortRange = PortRange { lo: 0, hi: u16::MAX, negated: false };

    pub fn single(port: u16) -> Self {
        Self { lo: port, hi: port, negated: false }
    }

    /// Parse `any`, `80`, `1024:65535`, `:1024`, `1024:`, or a leading `!`
    /// for negation, per the rule-file port grammar.
    pub fn parse(s: &str) -> Result<Self> {
        let (s, negated) = match s.strip_prefix('!') {
            Some(rest) => (rest, true),
            None => (s, false),
        };
        if s.eq_ignore_ascii_case("any") {
            return Ok(PortRange { negated, ..PortRange::ANY });
        }
        if let Some((lo, hi)) = s.split_once(':') {
            let lo = if lo.is_empty() { 0 } else { lo.parse().map_err(|_| AegisError::InvalidPort(s.to_string()))? };
            let hi = if hi.is_empty() { u16::MAX } else { hi.parse().map_err(|_| AegisError::InvalidPort(s.to_string()))? };
            if lo > hi {
                return Err(AegisError::InvalidPort(s.to_string()));
            }
            return Ok(PortRange { lo, hi, negated });
        }
        let port: u16 = s.parse().map_err(|_| AegisError::InvalidPort(s.to_string()))?;
        Ok(PortRange { lo: port, hi: port, negated })
    }

    pub fn contains(&self, port: u16) -> bool {
        let inside = port >= self.lo && port <= self.hi;
        inside != self.negated
    }

    pub fn overlaps(&self, other: &PortRange) -> bool {
        self.lo <= other.hi && other.lo <= self.hi
    }

    pub fn is_any(&self) -> bool {
        !self.negated && self.lo == 0 && self.hi == u16::MAX
    }
}

/// A comma-separated bracketed group of port ranges, e.g. `[80,443,8000:8080]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortSet {
    pub ranges: Vec<PortRange>,
}

impl PortSet {
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let inner = trimmed.strip_prefix('[').and_then(|v| v.strip_suffix(']')).unwrap_or(trimmed);
        let mut ranges = Vec::new();
        for part in inner.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            ranges.push(PortRange::parse(part)?);
        }
        if ranges.is_empty() {
            ranges.push(PortRange::ANY);
        }
        Ok(PortSet { ranges })
    }

    pub fn contains(&self, port: u16) -> bool {
        self.ranges.iter().any(|r| r.contains(port))
    }

    pub fn is_any(&self) -> bool {
        self.ranges.len() == 1 && self.ranges[0].is_any()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_port() {
        let p = PortRange::parse("80").unwrap();
        assert!(p.contains(80));
        assert!(!p.contains(81));
    }

    #[test]
    fn parses_open_ended_range() {
        let p = PortRange::parse("1024:").unwrap();
        assert!(p.contains(65535));
        assert!(!p.contains(1023));
    }

    #[test]
    fn parses_negated_range() {
        let p = PortRange::parse("!80").unwrap();
        assert!(!p.contains(80));
        assert!(p.contains(443));
    }

    #[test]
    fn port_set_parses_bracketed_list() {
        let set = PortSet::parse("[80,443,8000:8080]").unwrap();
        assert!(set.contains(443));
        assert!(set.contains(8050));
        assert!(!set.contains(22));
    }

    #[test]
    fn any_is_any() {
        let set = PortSet::parse("any").unwrap();
        assert!(set.is_any());
        assert!(set.contains(1));
        assert!(set.contains(65535));
    }
}
