//! Integration tests for YARP
//!
//! These tests drive the public API end to end: a document is loaded from
//! disk, validated, and reconciled against a scripted executor that answers
//! like the real tools would. Nothing here needs privileges or touches the
//! host's network state.
//!
//! ```bash
//! cargo test --test integration_tests
//! ```

#![allow(clippy::uninlined_format_args)]

use std::cell::RefCell;
use std::path::Path;
use yarp::audit::{Action, AuditEvent, AuditLog};
use yarp::core::addressing::{AddressingOptions, AddressingPlanner};
use yarp::core::executor::{CommandExecutor, CommandLine, CommandOutput, Program};
use yarp::core::firewall::FirewallManager;
use yarp::core::nat::NatManager;
use yarp::core::packet_filter::Iptables;
use yarp::core::resolver::ResolverWriter;
use yarp::core::routing::RouteApplier;
use yarp::{Error, Subsystem, config};

const ROUTER: &str = r#"
[system]
hostname = "edge"
domain = "home.lan"
dns_servers = ["192.168.1.1", "2606:4700:4700::1111"]

[interfaces.wan0]
ipv4 = "dhcp"
ipv6 = "auto"
masquerading = true
masquerade_sources = ["192.168.1.0/24"]

[interfaces.lan0]
ipv4 = "192.168.1.1/24"

[[routing.static]]
to = "10.20.0.0/16"
via = "192.168.1.254"

[firewall]
stateful = true
default = { input = "drop", forward = "drop", output = "accept" }

[[firewall.rules]]
name = "web"
from = "lan0"
to = "wan0"
action = "accept"
protocols = { tcp = "8000:8100" }

[[firewall.rules]]
name = "mail"
from = "lan0"
to = "wan0"
action = "reject"
protocols = { tcp = [25, 465, "587"] }
"#;

/// Executor that records every command and answers from canned outputs
#[derive(Default)]
struct Scripted {
    log: RefCell<Vec<String>>,
    answers: Vec<(Program, Vec<&'static str>, CommandOutput)>,
}

impl Scripted {
    fn answer(mut self, program: Program, needle: &[&'static str], output: CommandOutput) -> Self {
        self.answers.push((program, needle.to_vec(), output));
        self
    }

    fn lines(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    fn lines_matching(&self, prefix: &str) -> Vec<String> {
        self.lines().into_iter().filter(|l| l.starts_with(prefix)).collect()
    }
}

impl CommandExecutor for Scripted {
    fn execute(&self, cmd: &CommandLine) -> CommandOutput {
        self.log.borrow_mut().push(cmd.to_string());
        self.answers
            .iter()
            .find(|(program, needle, _)| *program == cmd.program && cmd.contains_args(needle))
            .map_or_else(|| CommandOutput::ok(""), |(_, _, output)| output.clone())
    }
}

fn write_document(dir: &Path, name: &str, text: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

#[test]
fn test_load_document_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_document(dir.path(), "config.toml", ROUTER);

    let doc = config::load(&path).unwrap();
    assert_eq!(doc.domain(), Some("home.lan"));
    assert_eq!(doc.dns_servers().len(), 2);
    assert_eq!(doc.masquerading_interfaces().count(), 1);
    assert_eq!(doc.firewall.as_ref().unwrap().rules.len(), 2);
}

#[test]
fn test_invalid_document_reports_every_issue() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_document(
        dir.path(),
        "config.json",
        r#"{
            "interfaces": {"wan0": {"masquerading": true}, "bad/name": {}},
            "firewall": {"rules": [{"name": "x", "from": "lan0", "to": "wan0", "action": "accept", "protocols": {"sctp": 9}}]}
        }"#,
    );

    match config::load(&path) {
        Err(Error::Validation(issues)) => {
            assert!(issues.len() >= 4, "{issues:#?}");
            assert!(issues.iter().any(|i| i.message.contains("wan0")));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_firewall_commands() {
    let doc = config::load_str(ROUTER, false, "router.toml").unwrap();
    let executor = Scripted::default();

    let report = FirewallManager::new(Iptables::new(&executor))
        .apply(doc.firewall.as_ref())
        .unwrap();

    assert!(report.is_success());
    assert_eq!(
        executor.lines_matching("iptables -t filter -P"),
        vec![
            "iptables -t filter -P INPUT DROP",
            "iptables -t filter -P FORWARD DROP",
            "iptables -t filter -P OUTPUT ACCEPT",
        ]
    );
    assert_eq!(
        executor.lines_matching("iptables -t filter -A FORWARD -i lan0"),
        vec![
            "iptables -t filter -A FORWARD -i lan0 -o wan0 -p tcp --dport 8000:8100 -m comment --comment YARP-FW-RULE-web -j ACCEPT",
            "iptables -t filter -A FORWARD -i lan0 -o wan0 -p tcp -m multiport --dports 25,465,587 -m comment --comment YARP-FW-RULE-mail -j REJECT --reject-with icmp-port-unreachable",
        ]
    );
}

#[test]
fn test_stale_rules_deleted_highest_first() {
    let listing = "\
Chain FORWARD (policy DROP 0 packets, 0 bytes)
num  target     prot opt source               destination
1    DOCKER-USER  all  --  0.0.0.0/0            0.0.0.0/0
2    ACCEPT     all  --  0.0.0.0/0            0.0.0.0/0            ctstate RELATED,ESTABLISHED /* YARP-FW-STATEFUL-FORWARD */
3    ACCEPT     all  --  0.0.0.0/0            0.0.0.0/0
4    DROP       all  --  0.0.0.0/0            0.0.0.0/0
5    ACCEPT     tcp  --  0.0.0.0/0            0.0.0.0/0            tcp dpts:8000:8100 /* YARP-FW-RULE-web */
6    ACCEPT     all  --  192.168.1.0/24       0.0.0.0/0            /* YARP-FORWARD-OUT */
7    REJECT     tcp  --  0.0.0.0/0            0.0.0.0/0            /* YARP-FW-RULE-old */ reject-with icmp-port-unreachable
";
    let executor = Scripted::default().answer(
        Program::Iptables,
        &["-L", "FORWARD"],
        CommandOutput::ok(listing),
    );

    let report = FirewallManager::new(Iptables::new(&executor)).clear();

    assert_eq!(report.cleared, 3);
    assert_eq!(
        executor.lines_matching("iptables -t filter -D"),
        vec![
            "iptables -t filter -D FORWARD 7",
            "iptables -t filter -D FORWARD 5",
            "iptables -t filter -D FORWARD 2",
        ]
    );
}

#[test]
fn test_nat_prerequisite_failure_stops_before_rules() {
    let doc = config::load_str(ROUTER, false, "router.toml").unwrap();
    let executor = Scripted::default().answer(
        Program::Sysctl,
        &["net.ipv4.ip_forward=1"],
        CommandOutput::failed(255, "sysctl: permission denied on key \"net.ipv4.ip_forward\""),
    );

    let result = NatManager::new(Iptables::new(&executor), &executor).apply(&doc);

    assert!(matches!(result, Err(Error::Prerequisite { .. })));
    assert!(executor.lines_matching("iptables").is_empty());
}

#[test]
fn test_nat_commands() {
    let doc = config::load_str(ROUTER, false, "router.toml").unwrap();
    let executor = Scripted::default();

    let report = NatManager::new(Iptables::new(&executor), &executor)
        .apply(&doc)
        .unwrap();

    assert!(report.is_success());
    assert_eq!(
        executor.lines_matching("iptables -t nat -A"),
        vec!["iptables -t nat -A POSTROUTING -s 192.168.1.0/24 -o wan0 -m comment --comment YARP-NAT-wan0 -j MASQUERADE"]
    );
    assert!(executor.lines().contains(
        &"iptables -t filter -A FORWARD -i wan0 -m conntrack --ctstate ESTABLISHED,RELATED -m comment --comment YARP-FORWARD-IN -j ACCEPT"
            .to_string()
    ));
}

#[test]
fn test_network_and_routes() {
    let doc = config::load_str(ROUTER, false, "router.toml").unwrap();
    let executor = Scripted::default()
        .answer(
            Program::Ip,
            &["-4", "addr", "show", "dev", "wan0"],
            CommandOutput::ok("    inet 198.51.100.7/24 brd 198.51.100.255 scope global dynamic wan0\n"),
        )
        .answer(Program::Pgrep, &["udhcpc.*wan0"], CommandOutput::ok("912\n"))
        .answer(
            Program::Ip,
            &["route", "add", "10.20.0.0/16"],
            CommandOutput::failed(2, "RTNETLINK answers: File exists"),
        );

    let network = AddressingPlanner::with_options(
        &executor,
        AddressingOptions {
            settle: std::time::Duration::ZERO,
            ..AddressingOptions::default()
        },
    )
    .apply(&doc);
    let routing = RouteApplier::new(&executor).apply(&doc);

    assert_eq!((network.applied, network.total), (2, 2));
    assert!(executor.lines_matching("udhcpc").is_empty());
    assert!(
        executor
            .lines()
            .contains(&"sysctl -w net.ipv6.conf.wan0.accept_ra=1".to_string())
    );
    assert!(routing.is_success());
}

#[test]
fn test_resolver_round_trip_with_audit() {
    let dir = tempfile::tempdir().unwrap();
    let resolv = write_document(dir.path(), "resolv.conf", "nameserver 203.0.113.53\n");
    let doc = config::load_str(ROUTER, false, "router.toml").unwrap();
    let writer = ResolverWriter::new(&resolv);
    let audit = AuditLog::new(dir.path().join("audit.log"));

    let report = writer.apply(&doc).unwrap();
    audit.record(&AuditEvent::from_report(Action::Apply, &report));

    let written = std::fs::read_to_string(&resolv).unwrap();
    assert!(written.contains("search home.lan"));
    assert!(written.contains("nameserver 2606:4700:4700::1111"));

    let cleared = writer.clear();
    audit.record(&AuditEvent::from_report(Action::Clear, &cleared));
    assert_eq!(std::fs::read_to_string(&resolv).unwrap(), "nameserver 203.0.113.53\n");

    let events = audit.read_recent(10).unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.subsystem == Subsystem::Dns && e.success));
}
