//! Static routes
//!
//! Each declared route becomes one `ip route add` (or `ip -6 route add`).
//! A route that is already in the table counts as applied, so re-running a
//! document is harmless. Any other failure is counted and the remaining
//! routes are still attempted.

use crate::core::document::{ConfigDocument, RouteSpec};
use crate::core::executor::{CommandExecutor, CommandLine, Program};
use crate::core::report::{ApplyReport, Subsystem};
use ipnetwork::IpNetwork;
use std::fmt::Write as _;
use tracing::{error, info, info_span};

/// Destination with host bits cleared; iproute2 rejects `10.0.0.5/24`
fn destination(to: IpNetwork) -> IpNetwork {
    IpNetwork::new(to.network(), to.prefix()).unwrap_or(to)
}

/// argv for `ip` to add or delete `route` (`verb` is `add` or `del`)
pub fn route_args(route: &RouteSpec, verb: &str) -> Vec<String> {
    let mut args = Vec::with_capacity(10);
    if route.is_ipv6() {
        args.push("-6".to_string());
    }
    args.extend(["route".to_string(), verb.to_string()]);
    args.push(destination(route.to).to_string());
    if let Some(via) = route.via {
        args.extend(["via".to_string(), via.to_string()]);
    }
    if let Some(dev) = &route.interface {
        args.extend(["dev".to_string(), dev.clone()]);
    }
    if let Some(metric) = route.metric {
        args.extend(["metric".to_string(), metric.to_string()]);
    }
    args
}

fn already_exists(stderr: &str) -> bool {
    stderr.contains("File exists")
}

fn already_absent(stderr: &str) -> bool {
    stderr.contains("No such process") || stderr.contains("not found")
}

pub struct RouteApplier<E> {
    executor: E,
}

impl<E: CommandExecutor> RouteApplier<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn apply(&self, doc: &ConfigDocument) -> ApplyReport {
        let _span = info_span!("routing").entered();
        let mut report = ApplyReport::new(Subsystem::Routing);

        for route in &doc.routes {
            let cmd = CommandLine::new(Program::Ip, route_args(route, "add"));
            let output = self.executor.run(&cmd);
            let ok = if output.success {
                info!(to = %route.to, "route added");
                true
            } else if already_exists(&output.stderr) {
                info!(to = %route.to, "route already present");
                true
            } else {
                error!(to = %route.to, stderr = %output.stderr.trim(), "failed to add route");
                false
            };
            report.record(ok);
        }

        info!(applied = report.applied, total = report.total, "static routes applied");
        report
    }

    /// Deletes every declared route. Routes already gone count as removed.
    pub fn clear(&self, doc: &ConfigDocument) -> ApplyReport {
        let _span = info_span!("routing").entered();
        let mut report = ApplyReport::new(Subsystem::Routing);

        for route in &doc.routes {
            let output = self
                .executor
                .run(&CommandLine::new(Program::Ip, route_args(route, "del")));
            report.record(output.success || already_absent(&output.stderr));
        }
        report
    }

    pub fn show(&self, doc: &ConfigDocument) -> String {
        let mut out = String::from("=== Routing ===\n\n--- Declared ---\n");
        for route in &doc.routes {
            let declared = route_args(route, "add")
                .into_iter()
                .skip_while(|a| a != "add")
                .skip(1)
                .collect::<Vec<_>>()
                .join(" ");
            let _ = writeln!(out, "  {declared}");
        }

        for (title, family) in [("IPv4", "-4"), ("IPv6", "-6")] {
            let _ = writeln!(out, "\n--- {title} table ---");
            let output = self
                .executor
                .probe(&CommandLine::new(Program::Ip, [family, "route", "show"]));
            if output.success {
                for line in output.stdout.lines() {
                    let _ = writeln!(out, "  {line}");
                }
            } else {
                let _ = writeln!(out, "  unavailable: {}", output.stderr.trim());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(to: &str, via: Option<&str>, dev: Option<&str>, metric: Option<u32>) -> RouteSpec {
        RouteSpec {
            to: to.parse().unwrap(),
            via: via.map(|v| v.parse().unwrap()),
            interface: dev.map(str::to_string),
            metric,
        }
    }

    #[test]
    fn test_ipv4_route_args() {
        let args = route_args(&route("10.0.0.0/24", Some("10.0.0.1"), None, None), "add");
        assert_eq!(args, vec!["route", "add", "10.0.0.0/24", "via", "10.0.0.1"]);
    }

    #[test]
    fn test_ipv6_route_args() {
        let args = route_args(
            &route("fd10::/64", Some("fd00::1"), Some("lan0"), Some(50)),
            "add",
        );
        assert_eq!(
            args,
            vec!["-6", "route", "add", "fd10::/64", "via", "fd00::1", "dev", "lan0", "metric", "50"]
        );
    }

    #[test]
    fn test_host_bits_cleared() {
        let args = route_args(&route("10.0.0.5/24", None, Some("eth0"), None), "del");
        assert_eq!(args, vec!["route", "del", "10.0.0.0/24", "dev", "eth0"]);
    }

    #[test]
    fn test_error_classification() {
        assert!(already_exists("RTNETLINK answers: File exists\n"));
        assert!(!already_exists("Error: Nexthop has invalid gateway."));
        assert!(already_absent("RTNETLINK answers: No such process"));
    }
}
