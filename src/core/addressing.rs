//! Interface addressing
//!
//! For each declared interface: check it exists, bring it up, then configure
//! IPv4 (DHCP or static) and IPv6 (autoconfiguration or static). Interfaces
//! are independent; one failing never stops the next.
//!
//! DHCP is the only mode with an idempotency guard. If the interface already
//! holds a routable IPv4 address and a `udhcpc` for it is running, the lease
//! is kept as is instead of being flushed and renegotiated on every run.

use crate::core::document::{ConfigDocument, InterfaceSpec, Ipv4Mode, Ipv6Mode};
use crate::core::executor::{CommandExecutor, CommandLine, Program};
use crate::core::report::{ApplyReport, Subsystem};
use crate::validators::is_link_local_v4;
use ipnetwork::{IpNetwork, Ipv4Network};
use std::fmt::Write as _;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn};

pub const DEFAULT_DHCP_TIMEOUT: Duration = Duration::from_secs(30);

/// IPv4 addresses listed by `ip -4 addr show`
pub fn parse_ipv4_addresses(output: &str) -> Vec<Ipv4Network> {
    output
        .lines()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            (words.next()? == "inet").then_some(())?;
            Ipv4Network::from_str(words.next()?).ok()
        })
        .collect()
}

/// True if any address is usable beyond the link (not 169.254.0.0/16)
pub fn has_routable_ipv4(output: &str) -> bool {
    parse_ipv4_addresses(output)
        .iter()
        .any(|net| !is_link_local_v4(net.ip()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressingOptions {
    /// Upper bound for one DHCP negotiation
    pub dhcp_timeout: Duration,
    /// Pause after killing stale DHCP clients
    pub settle: Duration,
}

impl Default for AddressingOptions {
    fn default() -> Self {
        Self {
            dhcp_timeout: DEFAULT_DHCP_TIMEOUT,
            settle: Duration::from_secs(1),
        }
    }
}

pub struct AddressingPlanner<E> {
    executor: E,
    options: AddressingOptions,
}

fn ip<const N: usize>(args: [&str; N]) -> CommandLine {
    CommandLine::new(Program::Ip, args)
}

fn client_pattern(iface: &str, client: &str) -> String {
    format!("{client}.*{iface}")
}

impl<E: CommandExecutor> AddressingPlanner<E> {
    pub fn new(executor: E) -> Self {
        Self::with_options(executor, AddressingOptions::default())
    }

    pub fn with_options(executor: E, options: AddressingOptions) -> Self {
        Self { executor, options }
    }

    /// Configures every declared interface. Never aborts early.
    pub fn apply(&self, doc: &ConfigDocument) -> ApplyReport {
        let _span = info_span!("network").entered();
        let mut report = ApplyReport::new(Subsystem::Network);

        for (name, spec) in &doc.interfaces {
            let ok = self.configure(name, spec, &mut report);
            report.record(ok);
        }

        info!(
            configured = report.applied,
            total = report.total,
            "interfaces configured"
        );
        report
    }

    fn configure(&self, iface: &str, spec: &InterfaceSpec, report: &mut ApplyReport) -> bool {
        if !self.executor.probe(&ip(["link", "show", "dev", iface])).success {
            error!(iface, "interface does not exist");
            return false;
        }

        if !self.executor.run(&ip(["link", "set", "dev", iface, "up"])).success {
            error!(iface, "could not bring interface up");
            return false;
        }

        let ipv4_ok = match spec.ipv4 {
            None => true,
            Some(Ipv4Mode::Dhcp) => self.dhcp(iface),
            Some(Ipv4Mode::Static(addr)) => self.static_address(iface, addr),
        };
        if !ipv4_ok {
            return false;
        }

        let ipv6_ok = match spec.ipv6 {
            None => true,
            Some(Ipv6Mode::Auto) => {
                self.ipv6_autoconf(iface, report);
                true
            }
            Some(Ipv6Mode::Static(addr)) => self.static_address(iface, addr),
        };
        if ipv6_ok {
            info!(iface, "interface configured");
        }
        ipv6_ok
    }

    /// Existing routable address and a running client for this interface
    fn lease_active(&self, iface: &str) -> bool {
        let addresses = self.executor.probe(&ip(["-4", "addr", "show", "dev", iface]));
        if !(addresses.success && has_routable_ipv4(&addresses.stdout)) {
            return false;
        }
        let pattern = client_pattern(iface, "udhcpc");
        let running = self
            .executor
            .probe(&CommandLine::new(Program::Pgrep, ["-f", pattern.as_str()]))
            .success;
        if !running {
            debug!(iface, "address present but no DHCP client running, renewing");
        }
        running
    }

    fn dhcp(&self, iface: &str) -> bool {
        if self.lease_active(iface) {
            info!(iface, "DHCP lease already active, keeping it");
            return true;
        }

        self.executor.run(&ip(["-4", "addr", "flush", "dev", iface]));

        // Exit status 1 just means nothing matched
        for client in ["dhcpcd", "udhcpc"] {
            let pattern = client_pattern(iface, client);
            self.executor
                .probe(&CommandLine::new(Program::Pkill, ["-f", pattern.as_str()]));
        }
        if !self.options.settle.is_zero() {
            std::thread::sleep(self.options.settle);
        }

        info!(iface, timeout_secs = self.options.dhcp_timeout.as_secs(), "requesting DHCP lease");
        let cmd = CommandLine::new(
            Program::Udhcpc,
            ["-i", iface, "-t", "3", "-T", "10", "-A", "10", "-n"],
        )
        .with_timeout(self.options.dhcp_timeout);

        let output = self.executor.run(&cmd);
        if output.success {
            info!(iface, "DHCP lease obtained");
            true
        } else {
            error!(
                iface,
                timed_out = output.timed_out,
                "DHCP failed, interface left without an IPv4 address"
            );
            false
        }
    }

    /// Flushes the family's global addresses, then assigns `addr`.
    fn static_address(&self, iface: &str, addr: IpNetwork) -> bool {
        let address = addr.to_string();
        let (family, flush): (&str, CommandLine) = match addr {
            IpNetwork::V4(_) => ("-4", ip(["-4", "addr", "flush", "dev", iface])),
            IpNetwork::V6(_) => (
                "-6",
                ip(["-6", "addr", "flush", "dev", iface, "scope", "global"]),
            ),
        };

        self.executor.run(&flush);
        let output = self
            .executor
            .run(&ip([family, "addr", "add", address.as_str(), "dev", iface]));
        if output.success {
            info!(iface, %address, "static address assigned");
        } else {
            error!(iface, %address, "failed to assign static address");
        }
        output.success
    }

    fn ipv6_autoconf(&self, iface: &str, report: &mut ApplyReport) {
        for key in ["autoconf", "accept_ra"] {
            let setting = format!("net.ipv6.conf.{iface}.{key}=1");
            let cmd = CommandLine::new(Program::Sysctl, ["-w", setting.as_str()]);
            if !self.executor.run(&cmd).success {
                report.warn(format!("could not set {setting}"));
            }
        }
        info!(iface, "IPv6 autoconfiguration enabled");
    }

    /// Current addresses of every declared interface.
    pub fn show(&self, doc: &ConfigDocument) -> String {
        let mut out = String::from("=== Interfaces ===\n");
        for (name, spec) in &doc.interfaces {
            let ipv4 = match spec.ipv4 {
                Some(Ipv4Mode::Dhcp) => "dhcp".to_string(),
                Some(Ipv4Mode::Static(a)) => a.to_string(),
                None => "-".to_string(),
            };
            let ipv6 = match spec.ipv6 {
                Some(Ipv6Mode::Auto) => "auto".to_string(),
                Some(Ipv6Mode::Static(a)) => a.to_string(),
                None => "-".to_string(),
            };
            let _ = writeln!(out, "\n--- {name} (ipv4: {ipv4}, ipv6: {ipv6}) ---");

            let output = self.executor.probe(&ip(["addr", "show", "dev", name.as_str()]));
            if output.success {
                for line in output.stdout.lines() {
                    let _ = writeln!(out, "  {}", line.trim_end());
                }
            } else {
                let _ = writeln!(out, "  not present");
            }
        }
        out
    }

    /// Flushes addresses of interfaces declared with a static address.
    /// DHCP and autoconfigured interfaces are left alone.
    pub fn clear(&self, doc: &ConfigDocument) -> ApplyReport {
        let _span = info_span!("network").entered();
        let mut report = ApplyReport::new(Subsystem::Network);

        for (name, spec) in doc.interfaces.iter().filter(|(_, s)| s.has_static_address()) {
            let mut ok = true;
            if matches!(spec.ipv4, Some(Ipv4Mode::Static(_))) {
                ok &= self.executor.run(&ip(["-4", "addr", "flush", "dev", name.as_str()])).success;
            }
            if matches!(spec.ipv6, Some(Ipv6Mode::Static(_))) {
                ok &= self
                    .executor
                    .run(&ip(["-6", "addr", "flush", "dev", name.as_str(), "scope", "global"]))
                    .success;
            }
            if !ok {
                warn!(iface = %name, "could not flush static addresses");
            }
            report.record(ok);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR_SHOW: &str = "\
2: wan0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc fq_codel state UP group default qlen 1000
    inet 169.254.12.7/16 brd 169.254.255.255 scope link wan0
       valid_lft forever preferred_lft forever
    inet 203.0.113.45/24 brd 203.0.113.255 scope global dynamic wan0
       valid_lft 86123sec preferred_lft 86123sec
";

    #[test]
    fn test_parse_ipv4_addresses() {
        let addrs = parse_ipv4_addresses(ADDR_SHOW);
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[1], "203.0.113.45/24".parse().unwrap());
    }

    #[test]
    fn test_link_local_only_is_not_a_lease() {
        let link_local_only = ADDR_SHOW
            .lines()
            .filter(|l| !l.contains("203.0.113"))
            .collect::<Vec<_>>()
            .join("\n");
        assert!(!has_routable_ipv4(&link_local_only));
        assert!(has_routable_ipv4(ADDR_SHOW));
        assert!(!has_routable_ipv4(""));
    }

    #[test]
    fn test_inet6_lines_ignored() {
        assert!(parse_ipv4_addresses("    inet6 fe80::1/64 scope link").is_empty());
    }

    #[test]
    fn test_client_pattern() {
        assert_eq!(client_pattern("wan0", "udhcpc"), "udhcpc.*wan0");
    }
}
