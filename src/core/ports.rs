//! Port specifications for TCP/UDP rules
//!
//! Documents may write a port as an integer, a string (`"443"` or
//! `"8000:8100"`), or a list of those. All of them are read into a
//! [`PortSpec`] once, during validation, and [`PortSpec::normalize`] produces
//! the canonical form that rule generation consumes.

use crate::validators::{validate_port, validate_port_range};
use serde_json::Value;
use std::fmt;

/// Maximum match slots of the iptables multiport module (a range uses two)
pub const MULTIPORT_MAX_SLOTS: usize = 15;

/// One element of a port set
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PortEntry {
    Single(u16),
    Range(u16, u16),
}

impl PortEntry {
    fn normalize(self) -> Self {
        match self {
            PortEntry::Range(start, end) if start == end => PortEntry::Single(start),
            other => other,
        }
    }

    fn slots(self) -> usize {
        match self {
            PortEntry::Single(_) => 1,
            PortEntry::Range(..) => 2,
        }
    }

    /// Parses `"80"` or `"8000:8100"`.
    fn parse(text: &str) -> Result<Self, String> {
        match text.split_once(':') {
            Some((start, end)) => {
                let (start, end) = validate_port_range(parse_digits(start)?, parse_digits(end)?)?;
                Ok(PortEntry::Range(start, end))
            }
            None => Ok(PortEntry::Single(validate_port(parse_digits(text)?)?)),
        }
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        match value {
            Value::Number(n) => {
                let port = n
                    .as_u64()
                    .and_then(|p| u16::try_from(p).ok())
                    .ok_or_else(|| format!("port {n} is not an integer between 1 and 65535"))?;
                Ok(PortEntry::Single(validate_port(port)?))
            }
            Value::String(s) => Self::parse(s),
            other => Err(format!("unsupported port value {other}")),
        }
    }
}

impl fmt::Display for PortEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortEntry::Single(port) => write!(f, "{port}"),
            PortEntry::Range(start, end) => write!(f, "{start}:{end}"),
        }
    }
}

fn parse_digits(text: &str) -> Result<u16, String> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("'{text}' is not a port number"));
    }
    text.parse::<u32>()
        .ok()
        .and_then(|p| u16::try_from(p).ok())
        .ok_or_else(|| format!("port {text} is out of range (1-65535)"))
}

/// Destination port qualifier for a TCP/UDP rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSpec {
    Single(u16),
    Range(u16, u16),
    Set(Vec<PortEntry>),
}

impl PortSpec {
    /// Reads the document value for one protocol entry.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem if the value does not follow
    /// the port grammar.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let spec = match value {
            Value::Array(items) => {
                if items.is_empty() {
                    return Err("port list is empty".to_string());
                }
                let entries = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| PortEntry::from_value(item).map_err(|e| format!("item {i}: {e}")))
                    .collect::<Result<Vec<_>, _>>()?;
                PortSpec::Set(entries)
            }
            single => match PortEntry::from_value(single)? {
                PortEntry::Single(port) => PortSpec::Single(port),
                PortEntry::Range(start, end) => PortSpec::Range(start, end),
            },
        };

        let spec = spec.normalize();
        if let PortSpec::Set(entries) = &spec {
            let slots: usize = entries.iter().map(|e| e.slots()).sum();
            if slots > MULTIPORT_MAX_SLOTS {
                return Err(format!(
                    "port list needs {slots} multiport slots (max {MULTIPORT_MAX_SLOTS}, a range counts as 2)"
                ));
            }
        }
        Ok(spec)
    }

    /// Canonical form: degenerate ranges become single ports, sets are
    /// sorted and de-duplicated, and a one-element set collapses to its
    /// element. Normalizing a normalized spec returns it unchanged.
    pub fn normalize(&self) -> Self {
        match self {
            PortSpec::Single(port) => PortSpec::Single(*port),
            PortSpec::Range(start, end) if start == end => PortSpec::Single(*start),
            PortSpec::Range(start, end) => PortSpec::Range(*start, *end),
            PortSpec::Set(entries) => {
                let mut entries: Vec<PortEntry> = entries.iter().map(|e| e.normalize()).collect();
                entries.sort_unstable();
                entries.dedup();
                match entries.as_slice() {
                    [PortEntry::Single(port)] => PortSpec::Single(*port),
                    [PortEntry::Range(start, end)] => PortSpec::Range(*start, *end),
                    _ => PortSpec::Set(entries),
                }
            }
        }
    }

    /// iptables match arguments for this spec.
    pub fn match_args(&self) -> Vec<String> {
        match self.normalize() {
            PortSpec::Single(port) => vec!["--dport".to_string(), port.to_string()],
            PortSpec::Range(start, end) => vec!["--dport".to_string(), format!("{start}:{end}")],
            PortSpec::Set(entries) => vec![
                "-m".to_string(),
                "multiport".to_string(),
                "--dports".to_string(),
                entries
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
            ],
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::Single(port) => write!(f, "{port}"),
            PortSpec::Range(start, end) => write!(f, "{start}:{end}"),
            PortSpec::Set(entries) => {
                let joined: Vec<String> = entries.iter().map(ToString::to_string).collect();
                write!(f, "{}", joined.join(","))
            }
        }
    }
}
