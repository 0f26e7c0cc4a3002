//! Typed configuration document
//!
//! A [`ConfigDocument`] is only ever produced by [`crate::core::validate`], so
//! every value in it has already been checked: addresses are parsed, interface
//! references resolve, and port specifications are normalized. Subsystems
//! consume this model and never look at the raw document tree.
//!
//! # Example
//!
//! ```
//! use yarp::core::validate::validate;
//! use serde_json::json;
//!
//! let doc = validate(&json!({
//!     "interfaces": {
//!         "lan0": { "ipv4": "192.168.1.1/24" },
//!         "wan0": { "ipv4": "dhcp", "masquerading": true,
//!                   "masquerade_sources": ["192.168.1.0/24"] }
//!     }
//! }))
//! .unwrap();
//! assert_eq!(doc.masquerading_interfaces().count(), 1);
//! ```

use crate::core::ports::PortSpec;
use indexmap::IndexMap;
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use std::path::PathBuf;

/// Verdict used both for chain default policies and rule actions
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Action {
    #[default]
    #[strum(serialize = "accept")]
    Accept,
    #[strum(serialize = "drop")]
    Drop,
    #[strum(serialize = "reject")]
    Reject,
}

/// Protocols a rule may match on
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
)]
#[strum(ascii_case_insensitive)]
pub enum Protocol {
    #[strum(serialize = "tcp")]
    Tcp,
    #[strum(serialize = "udp")]
    Udp,
    #[strum(serialize = "icmp")]
    Icmp,
}

impl Protocol {
    /// Whether this protocol carries a destination port
    pub const fn has_ports(self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Udp)
    }
}

/// `system` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemSpec {
    pub hostname: String,
    pub domain: Option<String>,
    pub timezone: Option<String>,
    pub dns_servers: Vec<IpAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ipv4Mode {
    Dhcp,
    /// Address with prefix; host bits are kept
    Static(IpNetwork),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ipv6Mode {
    /// SLAAC via `autoconf` and `accept_ra`
    Auto,
    Static(IpNetwork),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceSpec {
    pub ipv4: Option<Ipv4Mode>,
    pub ipv6: Option<Ipv6Mode>,
    pub masquerading: bool,
    /// Non-empty whenever `masquerading` is set
    pub masquerade_sources: Vec<IpNetwork>,
}

impl InterfaceSpec {
    /// True if either family is assigned a literal address
    pub fn has_static_address(&self) -> bool {
        matches!(self.ipv4, Some(Ipv4Mode::Static(_))) || matches!(self.ipv6, Some(Ipv6Mode::Static(_)))
    }
}

/// One `routing.static` entry; at least one of `via`/`interface` is set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    pub to: IpNetwork,
    pub via: Option<IpAddr>,
    pub interface: Option<String>,
    pub metric: Option<u32>,
}

impl RouteSpec {
    pub fn is_ipv6(&self) -> bool {
        self.to.is_ipv6()
    }
}

/// Declared policy for the three filter chains (unspecified chains accept)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultPolicies {
    pub input: Action,
    pub forward: Action,
    pub output: Action,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolMatch {
    pub protocol: Protocol,
    /// Always `Some` for TCP/UDP, always `None` for ICMP
    pub ports: Option<PortSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protocols {
    Any,
    /// Document order of the protocol keys is preserved
    Match(Vec<ProtocolMatch>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub name: String,
    pub from: String,
    pub to: String,
    pub action: Action,
    pub protocols: Protocols,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FirewallSpec {
    pub default: DefaultPolicies,
    pub stateful: bool,
    pub rules: Vec<RuleSpec>,
}

/// Console rendering of log events
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum ConsoleFormat {
    /// Message only
    Minimal,
    /// Level and message
    #[default]
    Simple,
    /// Timestamp, level, target and message
    Detailed,
}

/// File sink rendering
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum FileFormat {
    #[default]
    Json,
    Simple,
    Detailed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFiles {
    pub application: Option<PathBuf>,
    pub error: Option<PathBuf>,
    /// Only written when `debug` is enabled
    pub debug: Option<PathBuf>,
    pub audit: Option<PathBuf>,
}

/// Optional `logging` section
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingSpec {
    pub level: Option<tracing::Level>,
    pub debug: bool,
    /// Per-subsystem overrides keyed by subsystem name
    pub modules: IndexMap<String, tracing::Level>,
    pub console: ConsoleFormat,
    pub file_format: FileFormat,
    pub files: LogFiles,
}

/// Validated, read-only model of one document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDocument {
    pub system: Option<SystemSpec>,
    /// Keyed by interface name, in document order
    pub interfaces: IndexMap<String, InterfaceSpec>,
    pub routes: Vec<RouteSpec>,
    pub firewall: Option<FirewallSpec>,
    pub logging: LoggingSpec,
}

impl ConfigDocument {
    /// Interfaces that masquerade, paired with their (non-empty) source networks
    pub fn masquerading_interfaces(&self) -> impl Iterator<Item = (&str, &[IpNetwork])> {
        self.interfaces
            .iter()
            .filter(|(_, spec)| spec.masquerading && !spec.masquerade_sources.is_empty())
            .map(|(name, spec)| (name.as_str(), spec.masquerade_sources.as_slice()))
    }

    pub fn domain(&self) -> Option<&str> {
        self.system.as_ref().and_then(|s| s.domain.as_deref())
    }

    pub fn dns_servers(&self) -> &[IpAddr] {
        self.system.as_ref().map_or(&[], |s| s.dns_servers.as_slice())
    }
}
