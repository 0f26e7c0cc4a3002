//! Per-subsystem outcome of an apply or clear run

use crate::core::packet_filter::ClearOutcome;
use std::fmt;

/// Independently reconcilable parts of the host configuration
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Subsystem {
    Network,
    Dns,
    Routing,
    Firewall,
    Nat,
}

impl Subsystem {
    /// Default apply order: addresses before the resolver and routes that
    /// depend on them, filter policy before the NAT forward rules.
    pub const APPLY_ORDER: [Subsystem; 5] = [
        Subsystem::Network,
        Subsystem::Dns,
        Subsystem::Routing,
        Subsystem::Firewall,
        Subsystem::Nat,
    ];
}

/// Counted result of one subsystem run.
///
/// Prerequisite failures are not represented here; they surface as
/// [`crate::Error::Prerequisite`] before a report is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub subsystem: Subsystem,
    pub applied: usize,
    pub total: usize,
    /// Best-effort steps that failed or were degraded
    pub warnings: Vec<String>,
    /// Previously applied rules removed during the Clear phase
    pub cleared: usize,
}

impl ApplyReport {
    pub fn new(subsystem: Subsystem) -> Self {
        Self {
            subsystem,
            applied: 0,
            total: 0,
            warnings: Vec::new(),
            cleared: 0,
        }
    }

    /// Counts one unit of work (rule, route, interface, masquerade pair)
    pub fn record(&mut self, succeeded: bool) {
        self.total += 1;
        if succeeded {
            self.applied += 1;
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(subsystem = %self.subsystem, "{message}");
        self.warnings.push(message);
    }

    /// Adds a cleanup result: removed rules are counted, failures become warnings
    pub fn absorb_clear(&mut self, outcome: ClearOutcome) {
        self.cleared += outcome.removed;
        for failure in outcome.failures {
            self.warn(failure);
        }
    }

    pub fn failed(&self) -> usize {
        self.total - self.applied
    }

    /// Full success: every counted unit applied. Warnings do not count.
    pub fn is_success(&self) -> bool {
        self.applied == self.total
    }
}

impl fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}/{} applied", self.subsystem, self.applied, self.total)?;
        if self.cleared > 0 {
            write!(f, ", {} stale removed", self.cleared)?;
        }
        match self.warnings.len() {
            0 => Ok(()),
            1 => write!(f, " (1 warning)"),
            n => write!(f, " ({n} warnings)"),
        }
    }
}
