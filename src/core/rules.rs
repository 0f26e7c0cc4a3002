//! iptables rule model and argument generation
//!
//! A [`FilterRule`] is one `iptables -A` invocation. Every rule YARP appends
//! carries a comment starting with one of the management tags below, which is
//! how later runs find and remove it again.
//!
//! # Example
//!
//! ```
//! use yarp::core::rules::{Chain, FilterRule, Table, Target};
//!
//! let rule = FilterRule::new(Table::Filter, Chain::Input, Target::Accept, "YARP-FW-LOOPBACK")
//!     .in_interface("lo");
//! assert_eq!(
//!     rule.to_args().join(" "),
//!     "-t filter -A INPUT -i lo -m comment --comment YARP-FW-LOOPBACK -j ACCEPT"
//! );
//! ```

use crate::core::document::Protocol;
use crate::core::ports::PortSpec;
use crate::validators::sanitize_label;
use ipnetwork::IpNetwork;

/// Prefix of every filter-table tag owned by the firewall subsystem
pub const FIREWALL_TAG: &str = "YARP-FW-";
/// Prefix of masquerade rules in the nat table
pub const NAT_TAG: &str = "YARP-NAT-";
/// Prefix of the forward rules that accompany masquerading
pub const FORWARD_TAG: &str = "YARP-FORWARD-";

pub const STATEFUL_INPUT_TAG: &str = "YARP-FW-STATEFUL-INPUT";
pub const STATEFUL_FORWARD_TAG: &str = "YARP-FW-STATEFUL-FORWARD";
pub const LOOPBACK_TAG: &str = "YARP-FW-LOOPBACK";
pub const FORWARD_OUT_TAG: &str = "YARP-FORWARD-OUT";
pub const FORWARD_IN_TAG: &str = "YARP-FORWARD-IN";

/// Management tag for a user rule. Rules sharing a name share a tag.
pub fn rule_tag(name: &str) -> String {
    format!("{FIREWALL_TAG}RULE-{}", sanitize_label(name))
}

/// Management tag for the masquerade rules of one egress interface
pub fn nat_tag(interface: &str) -> String {
    format!("{NAT_TAG}{}", sanitize_label(interface))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
pub enum Table {
    #[strum(serialize = "filter")]
    Filter,
    #[strum(serialize = "nat")]
    Nat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
pub enum Chain {
    #[strum(serialize = "INPUT")]
    Input,
    #[strum(serialize = "FORWARD")]
    Forward,
    #[strum(serialize = "OUTPUT")]
    Output,
    #[strum(serialize = "POSTROUTING")]
    Postrouting,
}

impl Chain {
    /// Built-in filter chains whose policy YARP manages
    pub const FILTER: [Chain; 3] = [Chain::Input, Chain::Forward, Chain::Output];
}

/// Rule verdict (`-j` argument)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
pub enum Target {
    #[strum(serialize = "ACCEPT")]
    Accept,
    #[strum(serialize = "DROP")]
    Drop,
    /// Answers with ICMP port-unreachable instead of silently discarding
    #[strum(serialize = "REJECT")]
    Reject,
    #[strum(serialize = "MASQUERADE")]
    Masquerade,
}

impl Target {
    pub fn args(self) -> Vec<String> {
        match self {
            Target::Reject => vec![
                "REJECT".to_string(),
                "--reject-with".to_string(),
                "icmp-port-unreachable".to_string(),
            ],
            other => vec![other.to_string()],
        }
    }

    /// Whether iptables accepts this as a built-in chain policy
    pub const fn is_policy(self) -> bool {
        matches!(self, Target::Accept | Target::Drop)
    }
}

/// One rule to append with `iptables -A`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRule {
    pub table: Table,
    pub chain: Chain,
    pub source: Option<IpNetwork>,
    pub in_interface: Option<String>,
    pub out_interface: Option<String>,
    pub protocol: Option<Protocol>,
    pub ports: Option<PortSpec>,
    /// Match only ESTABLISHED,RELATED connections
    pub established: bool,
    pub tag: String,
    pub target: Target,
}

impl FilterRule {
    pub fn new(table: Table, chain: Chain, target: Target, tag: impl Into<String>) -> Self {
        Self {
            table,
            chain,
            source: None,
            in_interface: None,
            out_interface: None,
            protocol: None,
            ports: None,
            established: false,
            tag: tag.into(),
            target,
        }
    }

    pub fn source(mut self, network: IpNetwork) -> Self {
        self.source = Some(network);
        self
    }

    pub fn in_interface(mut self, name: impl Into<String>) -> Self {
        self.in_interface = Some(name.into());
        self
    }

    pub fn out_interface(mut self, name: impl Into<String>) -> Self {
        self.out_interface = Some(name.into());
        self
    }

    pub fn protocol(mut self, protocol: Protocol, ports: Option<PortSpec>) -> Self {
        self.protocol = Some(protocol);
        self.ports = ports.filter(|_| protocol.has_ports());
        self
    }

    pub fn established(mut self) -> Self {
        self.established = true;
        self
    }

    /// Full argv for `iptables`, starting with the table selector.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "-t".to_string(),
            self.table.to_string(),
            "-A".to_string(),
            self.chain.to_string(),
        ];

        if let Some(source) = &self.source {
            args.extend(["-s".to_string(), source.to_string()]);
        }
        if let Some(iface) = &self.in_interface {
            args.extend(["-i".to_string(), iface.clone()]);
        }
        if let Some(iface) = &self.out_interface {
            args.extend(["-o".to_string(), iface.clone()]);
        }
        if let Some(protocol) = self.protocol {
            args.extend(["-p".to_string(), protocol.to_string()]);
            if let Some(ports) = &self.ports {
                args.extend(ports.match_args());
            }
        }
        if self.established {
            args.extend(
                ["-m", "conntrack", "--ctstate", "ESTABLISHED,RELATED"].map(String::from),
            );
        }

        args.extend(["-m".to_string(), "comment".to_string(), "--comment".to_string()]);
        args.push(self.tag.clone());
        args.push("-j".to_string());
        args.extend(self.target.args());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_tag_sanitized() {
        assert_eq!(rule_tag("web"), "YARP-FW-RULE-web");
        assert_eq!(rule_tag("lan to wan"), "YARP-FW-RULE-lan to wan");
        assert_eq!(rule_tag("evil*/ -j ACCEPT"), "YARP-FW-RULE-evil -j ACCEPT");
        assert!(rule_tag("web").starts_with(FIREWALL_TAG));
    }

    #[test]
    fn test_nat_tag() {
        assert_eq!(nat_tag("wan0"), "YARP-NAT-wan0");
    }

    #[test]
    fn test_reject_target_has_icmp_response() {
        assert_eq!(
            Target::Reject.args(),
            vec!["REJECT", "--reject-with", "icmp-port-unreachable"]
        );
        assert_eq!(Target::Drop.args(), vec!["DROP"]);
        assert!(!Target::Reject.is_policy());
        assert!(Target::Drop.is_policy());
    }

    #[test]
    fn test_port_rule_args() {
        let rule = FilterRule::new(Table::Filter, Chain::Forward, Target::Accept, rule_tag("web"))
            .in_interface("lan0")
            .out_interface("wan0")
            .protocol(Protocol::Tcp, Some(PortSpec::Range(8000, 8100)));
        assert_eq!(
            rule.to_args(),
            vec![
                "-t", "filter", "-A", "FORWARD", "-i", "lan0", "-o", "wan0", "-p", "tcp",
                "--dport", "8000:8100", "-m", "comment", "--comment", "YARP-FW-RULE-web", "-j",
                "ACCEPT"
            ]
        );
    }

    #[test]
    fn test_icmp_drops_ports() {
        let rule = FilterRule::new(Table::Filter, Chain::Forward, Target::Drop, "t")
            .protocol(Protocol::Icmp, Some(PortSpec::Single(1)));
        assert_eq!(rule.ports, None);
        assert!(!rule.to_args().contains(&"--dport".to_string()));
    }

    #[test]
    fn test_masquerade_rule_args() {
        let rule = FilterRule::new(Table::Nat, Chain::Postrouting, Target::Masquerade, nat_tag("wan0"))
            .source("192.168.1.0/24".parse().unwrap())
            .out_interface("wan0");
        assert_eq!(
            rule.to_args().join(" "),
            "-t nat -A POSTROUTING -s 192.168.1.0/24 -o wan0 -m comment --comment YARP-NAT-wan0 -j MASQUERADE"
        );
    }

    #[test]
    fn test_established_rule_args() {
        let rule = FilterRule::new(Table::Filter, Chain::Forward, Target::Accept, FORWARD_IN_TAG)
            .in_interface("wan0")
            .established();
        assert_eq!(
            rule.to_args().join(" "),
            "-t filter -A FORWARD -i wan0 -m conntrack --ctstate ESTABLISHED,RELATED -m comment --comment YARP-FORWARD-IN -j ACCEPT"
        );
    }
}
