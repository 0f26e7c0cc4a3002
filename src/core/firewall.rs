//! Firewall reconciliation
//!
//! One run is strictly ordered:
//!
//! 1. **Clear** every filter rule tagged `YARP-FW-` (absence is normal)
//! 2. **Default policies** for INPUT, FORWARD and OUTPUT (failure aborts)
//! 3. **Stateful** ESTABLISHED,RELATED and loopback accepts, if enabled (failure aborts)
//! 4. **User rules** on FORWARD in document order (failures are counted)
//!
//! Because step 1 removes everything steps 2-4 add, running the same
//! document twice leaves the same set of tagged rules as running it once.

use crate::core::document::{Action, FirewallSpec, Protocols, RuleSpec};
use crate::core::error::{Error, Result};
use crate::core::packet_filter::{PacketFilter, parse_policy, tagged_lines};
use crate::core::report::{ApplyReport, Subsystem};
use crate::core::rules::{
    Chain, FIREWALL_TAG, FilterRule, LOOPBACK_TAG, STATEFUL_FORWARD_TAG, STATEFUL_INPUT_TAG,
    Table, Target, rule_tag,
};
use std::fmt::Write as _;
use tracing::{error, info, info_span, warn};

/// Maps a declared chain policy to an iptables policy.
///
/// iptables has no REJECT policy, so `reject` degrades to DROP and the
/// second value carries the warning to record.
pub fn policy_target(chain: Chain, action: Action) -> (Target, Option<String>) {
    match action {
        Action::Accept => (Target::Accept, None),
        Action::Drop => (Target::Drop, None),
        Action::Reject => (
            Target::Drop,
            Some(format!(
                "REJECT is not supported as a chain policy for {chain}, using DROP"
            )),
        ),
    }
}

pub fn action_target(action: Action) -> Target {
    match action {
        Action::Accept => Target::Accept,
        Action::Drop => Target::Drop,
        Action::Reject => Target::Reject,
    }
}

/// Rules to append for one declared rule, in order.
///
/// `any` yields a single protocol-less rule; otherwise one rule per declared
/// protocol, with ports only on TCP/UDP.
pub fn expand_rule(rule: &RuleSpec) -> Vec<FilterRule> {
    let base = FilterRule::new(
        Table::Filter,
        Chain::Forward,
        action_target(rule.action),
        rule_tag(&rule.name),
    )
    .in_interface(&rule.from)
    .out_interface(&rule.to);

    match &rule.protocols {
        Protocols::Any => vec![base],
        Protocols::Match(matches) => matches
            .iter()
            .map(|m| base.clone().protocol(m.protocol, m.ports.clone()))
            .collect(),
    }
}

/// ESTABLISHED,RELATED on INPUT and FORWARD, then loopback
pub fn stateful_rules() -> [FilterRule; 3] {
    [
        FilterRule::new(Table::Filter, Chain::Input, Target::Accept, STATEFUL_INPUT_TAG)
            .established(),
        FilterRule::new(Table::Filter, Chain::Forward, Target::Accept, STATEFUL_FORWARD_TAG)
            .established(),
        FilterRule::new(Table::Filter, Chain::Input, Target::Accept, LOOPBACK_TAG)
            .in_interface("lo"),
    ]
}

/// Drives the filter table toward a [`FirewallSpec`]
pub struct FirewallManager<F> {
    filter: F,
}

impl<F: PacketFilter> FirewallManager<F> {
    pub fn new(filter: F) -> Self {
        Self { filter }
    }

    /// Runs the full reconciliation.
    ///
    /// A document without a `firewall` section leaves the filter untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Prerequisite`] if a chain policy or a stateful rule
    /// cannot be installed. Individual user-rule failures are counted in the
    /// report instead.
    pub fn apply(&self, spec: Option<&FirewallSpec>) -> Result<ApplyReport> {
        let _span = info_span!("firewall").entered();
        let mut report = ApplyReport::new(Subsystem::Firewall);

        let Some(spec) = spec else {
            info!("no firewall section declared, leaving the filter table untouched");
            return Ok(report);
        };

        report.absorb_clear(self.filter.clear_tagged(Table::Filter, &Chain::FILTER, FIREWALL_TAG));

        self.apply_policies(spec, &mut report)?;

        if spec.stateful {
            self.apply_stateful()?;
        } else {
            info!("stateful tracking disabled");
        }

        for rule in &spec.rules {
            let ok = self.apply_rule(rule);
            report.record(ok);
        }

        if report.is_success() {
            info!(applied = report.applied, total = report.total, "firewall configured");
        } else {
            warn!(
                applied = report.applied,
                total = report.total,
                "firewall partially configured"
            );
        }
        Ok(report)
    }

    fn apply_policies(&self, spec: &FirewallSpec, report: &mut ApplyReport) -> Result<()> {
        let declared = [
            (Chain::Input, spec.default.input),
            (Chain::Forward, spec.default.forward),
            (Chain::Output, spec.default.output),
        ];

        for (chain, action) in declared {
            let (target, degraded) = policy_target(chain, action);
            if let Some(message) = degraded {
                report.warn(message);
            }
            self.filter
                .set_policy(chain, target)
                .map_err(|e| Error::Prerequisite {
                    step: format!("setting {chain} policy to {target}"),
                    message: e.to_string(),
                })?;
            info!(%chain, policy = %target, "chain policy set");
        }
        Ok(())
    }

    fn apply_stateful(&self) -> Result<()> {
        for rule in stateful_rules() {
            self.filter.append(&rule).map_err(|e| Error::Prerequisite {
                step: format!("installing stateful rule {}", rule.tag),
                message: e.to_string(),
            })?;
        }
        info!("stateful rules installed");
        Ok(())
    }

    /// A rule with several protocols counts once and fails as a whole;
    /// protocols after the first failure are not attempted.
    fn apply_rule(&self, rule: &RuleSpec) -> bool {
        for filter_rule in expand_rule(rule) {
            if let Err(e) = self.filter.append(&filter_rule) {
                error!(
                    rule = %rule.name,
                    protocol = ?filter_rule.protocol,
                    error = %e,
                    "failed to apply rule"
                );
                return false;
            }
        }
        info!(
            rule = %rule.name,
            from = %rule.from,
            to = %rule.to,
            action = %rule.action,
            "rule applied"
        );
        true
    }

    /// Removes every tagged rule. Chain policies are left as they are.
    pub fn clear(&self) -> ApplyReport {
        let _span = info_span!("firewall").entered();
        let mut report = ApplyReport::new(Subsystem::Firewall);
        report.absorb_clear(self.filter.clear_tagged(Table::Filter, &Chain::FILTER, FIREWALL_TAG));
        report
    }

    /// Chain policies and tagged rules as currently installed.
    ///
    /// # Errors
    ///
    /// Returns `Err` if a chain cannot be listed.
    pub fn show(&self) -> Result<String> {
        let mut out = String::from("=== Firewall ===\n\n--- Default policies ---\n");
        let mut listings = Vec::with_capacity(Chain::FILTER.len());
        for chain in Chain::FILTER {
            let listing = self.filter.listing(Table::Filter, chain)?;
            let _ = writeln!(out, "  {chain}: {}", parse_policy(&listing).unwrap_or("unknown"));
            listings.push((chain, listing));
        }

        let sections = [
            ("Stateful rules", Chain::Input, STATEFUL_INPUT_TAG),
            ("Stateful rules", Chain::Input, LOOPBACK_TAG),
            ("Stateful rules", Chain::Forward, STATEFUL_FORWARD_TAG),
            ("User rules", Chain::Forward, "YARP-FW-RULE-"),
        ];
        let mut current = "";
        for (title, chain, tag) in sections {
            if title != current {
                let _ = writeln!(out, "\n--- {title} ---");
                current = title;
            }
            if let Some((_, listing)) = listings.iter().find(|(c, _)| *c == chain) {
                for line in tagged_lines(listing, tag) {
                    let _ = writeln!(out, "  {chain:<8} {line}");
                }
            }
        }
        Ok(out)
    }
}
