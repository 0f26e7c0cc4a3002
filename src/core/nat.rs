//! Masquerading (source NAT) reconciliation
//!
//! Same lifecycle as the firewall, specialized to NAT: enable forwarding,
//! clear `YARP-NAT-` rules in `nat POSTROUTING` and `YARP-FORWARD-` rules in
//! `filter FORWARD`, then for every (interface, source) pair append a
//! MASQUERADE rule plus the two FORWARD accepts that let the translated
//! traffic through in both directions.

use crate::core::document::ConfigDocument;
use crate::core::error::{Error, Result};
use crate::core::executor::{CommandExecutor, CommandLine, Program};
use crate::core::packet_filter::{ClearOutcome, PacketFilter, tagged_lines};
use crate::core::report::{ApplyReport, Subsystem};
use crate::core::rules::{
    Chain, FORWARD_IN_TAG, FORWARD_OUT_TAG, FORWARD_TAG, FilterRule, NAT_TAG, Table, Target,
    nat_tag,
};
use ipnetwork::IpNetwork;
use std::fmt::Write as _;
use tracing::{error, info, info_span};

pub const IPV4_FORWARD: &str = "net.ipv4.ip_forward";
pub const IPV6_FORWARD: &str = "net.ipv6.conf.all.forwarding";

/// Masquerade rule and its two forward accepts, in append order
pub fn pair_rules(interface: &str, source: IpNetwork) -> [FilterRule; 3] {
    [
        FilterRule::new(Table::Nat, Chain::Postrouting, Target::Masquerade, nat_tag(interface))
            .source(source)
            .out_interface(interface),
        FilterRule::new(Table::Filter, Chain::Forward, Target::Accept, FORWARD_OUT_TAG)
            .source(source)
            .out_interface(interface),
        FilterRule::new(Table::Filter, Chain::Forward, Target::Accept, FORWARD_IN_TAG)
            .in_interface(interface)
            .established(),
    ]
}

fn sysctl_enable(key: &str) -> CommandLine {
    CommandLine::new(Program::Sysctl, ["-w".to_string(), format!("{key}=1")])
}

pub struct NatManager<F, E> {
    filter: F,
    executor: E,
}

impl<F: PacketFilter, E: CommandExecutor> NatManager<F, E> {
    pub fn new(filter: F, executor: E) -> Self {
        Self { filter, executor }
    }

    fn clear_rules(&self) -> ClearOutcome {
        self.filter
            .clear_tagged(Table::Nat, &[Chain::Postrouting], NAT_TAG)
            .merge(self.filter.clear_tagged(Table::Filter, &[Chain::Forward], FORWARD_TAG))
    }

    /// Enables forwarding and installs masquerading for every interface that
    /// declares it. With no such interface, stale rules from earlier runs are
    /// still removed and forwarding is left as it is.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Prerequisite`] if IPv4 forwarding cannot be enabled.
    /// IPv6 forwarding is best effort.
    pub fn apply(&self, doc: &ConfigDocument) -> Result<ApplyReport> {
        let _span = info_span!("nat").entered();
        let mut report = ApplyReport::new(Subsystem::Nat);

        let interfaces: Vec<(&str, &[IpNetwork])> = doc.masquerading_interfaces().collect();
        if interfaces.is_empty() {
            report.absorb_clear(self.clear_rules());
            info!("no masquerading interface declared");
            return Ok(report);
        }

        self.executor
            .run_checked(&sysctl_enable(IPV4_FORWARD))
            .map_err(|e| Error::Prerequisite {
                step: "enabling IPv4 forwarding".to_string(),
                message: e.to_string(),
            })?;
        info!("IPv4 forwarding enabled");

        if self.executor.run(&sysctl_enable(IPV6_FORWARD)).success {
            info!("IPv6 forwarding enabled");
        } else {
            report.warn("could not enable IPv6 forwarding");
        }

        report.absorb_clear(self.clear_rules());

        for (interface, sources) in interfaces {
            for &source in sources {
                let ok = self.apply_pair(interface, source);
                report.record(ok);
            }
        }

        info!(
            applied = report.applied,
            total = report.total,
            "masquerading configured"
        );
        Ok(report)
    }

    fn apply_pair(&self, interface: &str, source: IpNetwork) -> bool {
        let mut ok = true;
        for rule in pair_rules(interface, source) {
            if let Err(e) = self.filter.append(&rule) {
                error!(interface, %source, tag = %rule.tag, error = %e, "failed to apply NAT rule");
                ok = false;
            }
        }
        if ok {
            info!(interface, %source, "masquerading pair applied");
        }
        ok
    }

    pub fn clear(&self) -> ApplyReport {
        let _span = info_span!("nat").entered();
        let mut report = ApplyReport::new(Subsystem::Nat);
        report.absorb_clear(self.clear_rules());
        report
    }

    /// Forwarding state and tagged NAT/forward rules.
    ///
    /// # Errors
    ///
    /// Returns `Err` if a chain cannot be listed.
    pub fn show(&self) -> Result<String> {
        let mut out = String::from("=== NAT ===\n\n--- Forwarding ---\n");
        for key in [IPV4_FORWARD, IPV6_FORWARD] {
            let probe = self.executor.probe(&CommandLine::new(Program::Sysctl, ["-n", key]));
            let state = if probe.success {
                probe.stdout.trim().to_string()
            } else {
                "unknown".to_string()
            };
            let _ = writeln!(out, "  {key} = {state}");
        }

        let _ = writeln!(out, "\n--- Masquerading (nat POSTROUTING) ---");
        let listing = self.filter.listing(Table::Nat, Chain::Postrouting)?;
        for line in tagged_lines(&listing, NAT_TAG) {
            let _ = writeln!(out, "  {line}");
        }

        let _ = writeln!(out, "\n--- Forwarding rules (filter FORWARD) ---");
        let listing = self.filter.listing(Table::Filter, Chain::Forward)?;
        for line in tagged_lines(&listing, FORWARD_TAG) {
            let _ = writeln!(out, "  {line}");
        }
        Ok(out)
    }
}
