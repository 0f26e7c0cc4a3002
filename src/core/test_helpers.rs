//! Shared test utilities for core module tests
//!
//! Provides in-memory stand-ins for the host so reconciliation can be tested
//! without root, iptables or real interfaces. This module is only compiled
//! in test mode.

use crate::core::document::ConfigDocument;
use crate::core::error::{Error, Result};
use crate::core::executor::{CommandExecutor, CommandLine, CommandOutput, Program};
use crate::core::packet_filter::PacketFilter;
use crate::core::rules::{Chain, FilterRule, Table, Target};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Mutex;

/// Mutex for tests that need exclusive access to environment variables.
///
/// Use this when your test needs to:
/// 1. Temporarily change env vars to different values
/// 2. Restore env vars after the test
/// 3. Test behavior when env vars are absent
///
/// # Example
///
/// ```ignore
/// let _guard = ENV_VAR_MUTEX.lock().unwrap();
/// unsafe {
///     std::env::set_var("YARP_ELEVATION_METHOD", "sudo");
/// }
/// // ... test with custom env state ...
/// unsafe {
///     std::env::remove_var("YARP_ELEVATION_METHOD");
/// }
/// ```
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

/// Parses and validates a TOML document, panicking on any problem.
pub fn document(text: &str) -> ConfigDocument {
    match crate::config::load_str(text, false, "test") {
        Ok(doc) => doc,
        Err(Error::Validation(issues)) => {
            panic!("test document is invalid: {issues:?}")
        }
        Err(e) => panic!("test document failed to load: {e}"),
    }
}

/// One installed rule. Seeded foreign rules have no [`FilterRule`].
#[derive(Debug, Clone)]
struct Entry {
    tag: String,
    rule: Option<FilterRule>,
}

#[derive(Default)]
struct FilterState {
    chains: HashMap<(Table, Chain), Vec<Entry>>,
    policies: HashMap<Chain, Target>,
    deletions: Vec<(Chain, usize)>,
    failing_policies: HashSet<Chain>,
    unlistable: HashSet<(Table, Chain)>,
}

type AppendFailure = Box<dyn Fn(&FilterRule) -> bool>;

/// In-memory iptables.
///
/// Listings are rendered in the `iptables -L -n --line-numbers` layout, so
/// the tag parsing used against the real binary is exercised unchanged.
/// Deleting a position renumbers the rules after it, as the kernel does.
#[derive(Default)]
pub struct SimulatedIptables {
    state: RefCell<FilterState>,
    append_failure: RefCell<Option<AppendFailure>>,
}

impl SimulatedIptables {
    /// Appends a rule that YARP did not create (only its comment matters)
    pub fn seed(&self, table: Table, chain: Chain, tag: &str) {
        self.state
            .borrow_mut()
            .chains
            .entry((table, chain))
            .or_default()
            .push(Entry {
                tag: tag.to_string(),
                rule: None,
            });
    }

    /// Makes `set_policy` fail for `chain`
    pub fn fail_policy(&self, chain: Chain) {
        self.state.borrow_mut().failing_policies.insert(chain);
    }

    /// Makes `listing` fail for one chain
    pub fn fail_listing(&self, table: Table, chain: Chain) {
        self.state.borrow_mut().unlistable.insert((table, chain));
    }

    /// Makes `append` fail for every rule matching `predicate`
    pub fn fail_append_when(&self, predicate: impl Fn(&FilterRule) -> bool + 'static) {
        *self.append_failure.borrow_mut() = Some(Box::new(predicate));
    }

    /// Deleted positions, in deletion order
    pub fn deletions(&self) -> Vec<(Chain, usize)> {
        self.state.borrow().deletions.clone()
    }

    /// Comments of the rules currently in a chain, top to bottom
    pub fn tags(&self, table: Table, chain: Chain) -> Vec<String> {
        self.state
            .borrow()
            .chains
            .get(&(table, chain))
            .map(|entries| entries.iter().map(|e| e.tag.clone()).collect())
            .unwrap_or_default()
    }

    /// Rules appended through [`PacketFilter::append`] still present in a chain
    pub fn rules(&self, table: Table, chain: Chain) -> Vec<FilterRule> {
        self.state
            .borrow()
            .chains
            .get(&(table, chain))
            .map(|entries| entries.iter().filter_map(|e| e.rule.clone()).collect())
            .unwrap_or_default()
    }

    pub fn policy(&self, chain: Chain) -> Option<Target> {
        self.state.borrow().policies.get(&chain).copied()
    }
}

impl PacketFilter for SimulatedIptables {
    fn listing(&self, table: Table, chain: Chain) -> Result<String> {
        let state = self.state.borrow();
        if state.unlistable.contains(&(table, chain)) {
            return Err(Error::Command {
                command: format!("iptables -t {table} -L {chain} -n --line-numbers"),
                exit_code: Some(4),
                stderr: "iptables: Resource temporarily unavailable.".to_string(),
            });
        }

        let mut out = match (table, state.policies.get(&chain)) {
            (Table::Filter, Some(policy)) => format!("Chain {chain} (policy {policy})\n"),
            _ => format!("Chain {chain} (policy ACCEPT)\n"),
        };
        out.push_str("num  target     prot opt source               destination\n");
        for (i, entry) in state
            .chains
            .get(&(table, chain))
            .into_iter()
            .flatten()
            .enumerate()
        {
            let target = entry
                .rule
                .as_ref()
                .map_or_else(|| "ACCEPT".to_string(), |r| r.target.to_string());
            let _ = writeln!(
                out,
                "{:<4} {target:<10} all  --  0.0.0.0/0            0.0.0.0/0            /* {} */",
                i + 1,
                entry.tag
            );
        }
        Ok(out)
    }

    fn delete_at(&self, table: Table, chain: Chain, position: usize) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let entries = state.chains.entry((table, chain)).or_default();
        if position == 0 || position > entries.len() {
            return Err(Error::Command {
                command: format!("iptables -t {table} -D {chain} {position}"),
                exit_code: Some(1),
                stderr: "iptables: Index of deletion too big.".to_string(),
            });
        }
        entries.remove(position - 1);
        state.deletions.push((chain, position));
        Ok(())
    }

    fn set_policy(&self, chain: Chain, target: Target) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.failing_policies.contains(&chain) || !target.is_policy() {
            return Err(Error::Command {
                command: format!("iptables -t filter -P {chain} {target}"),
                exit_code: Some(1),
                stderr: "iptables: Bad policy name.".to_string(),
            });
        }
        state.policies.insert(chain, target);
        Ok(())
    }

    fn append(&self, rule: &FilterRule) -> Result<()> {
        if self
            .append_failure
            .borrow()
            .as_ref()
            .is_some_and(|fails| fails(rule))
        {
            return Err(Error::Command {
                command: format!("iptables {}", rule.to_args().join(" ")),
                exit_code: Some(2),
                stderr: "iptables: No chain/target/match by that name.".to_string(),
            });
        }
        self.state
            .borrow_mut()
            .chains
            .entry((rule.table, rule.chain))
            .or_default()
            .push(Entry {
                tag: rule.tag.clone(),
                rule: Some(rule.clone()),
            });
        Ok(())
    }
}

struct Scripted {
    program: Program,
    needle: Vec<String>,
    output: CommandOutput,
}

impl Scripted {
    fn matches(&self, cmd: &CommandLine) -> bool {
        let needle: Vec<&str> = self.needle.iter().map(String::as_str).collect();
        cmd.program == self.program && (needle.is_empty() || cmd.contains_args(&needle))
    }
}

/// Executor that records every command and answers from a script.
///
/// Commands with no scripted answer succeed with empty output. The first
/// matching response wins.
#[derive(Default)]
pub struct RecordingExecutor {
    commands: RefCell<Vec<CommandLine>>,
    script: Vec<Scripted>,
}

impl RecordingExecutor {
    /// Answers commands of `program` whose argv contains `needle` with `output`.
    /// An empty needle matches every invocation of the program.
    pub fn respond(mut self, program: Program, needle: &[&str], output: CommandOutput) -> Self {
        self.script.push(Scripted {
            program,
            needle: needle.iter().map(|s| (*s).to_string()).collect(),
            output,
        });
        self
    }

    pub fn commands(&self) -> Vec<CommandLine> {
        self.commands.borrow().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.commands.borrow().iter().map(ToString::to_string).collect()
    }

    /// Number of recorded commands of `program` containing `needle`
    pub fn count(&self, program: Program, needle: &[&str]) -> usize {
        self.commands
            .borrow()
            .iter()
            .filter(|c| c.program == program && (needle.is_empty() || c.contains_args(needle)))
            .count()
    }

    pub fn ran(&self, program: Program, needle: &[&str]) -> bool {
        self.count(program, needle) > 0
    }
}

impl CommandExecutor for RecordingExecutor {
    fn execute(&self, cmd: &CommandLine) -> CommandOutput {
        self.commands.borrow_mut().push(cmd.clone());
        self.script
            .iter()
            .find(|s| s.matches(cmd))
            .map_or_else(|| CommandOutput::ok(""), |s| s.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_listing_layout() {
        let filter = SimulatedIptables::default();
        filter.set_policy(Chain::Input, Target::Drop).unwrap();
        filter.seed(Table::Filter, Chain::Input, "foreign");
        filter.seed(Table::Filter, Chain::Input, "YARP-FW-LOOPBACK");

        let listing = filter.listing(Table::Filter, Chain::Input).unwrap();
        assert!(listing.starts_with("Chain INPUT (policy DROP)"));
        assert_eq!(filter.list_tagged(Table::Filter, Chain::Input, "YARP-FW-").unwrap(), vec![2]);
    }

    #[test]
    fn test_recording_executor_script() {
        let executor = RecordingExecutor::default().respond(
            Program::Ip,
            &["link", "show"],
            CommandOutput::failed(1, "Device \"wan9\" does not exist."),
        );

        assert!(!executor.execute(&CommandLine::new(Program::Ip, ["link", "show", "dev", "wan9"])).success);
        assert!(executor.execute(&CommandLine::new(Program::Ip, ["link", "set", "dev", "wan9", "up"])).success);
        assert_eq!(executor.count(Program::Ip, &[]), 2);
        assert!(executor.ran(Program::Ip, &["set", "dev", "wan9"]));
    }
}
