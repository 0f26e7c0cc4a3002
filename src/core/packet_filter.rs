//! Packet filter access
//!
//! iptables exposes no query API beyond its textual listing, so managed rules
//! are found by scanning `iptables -L --line-numbers` output for a tag and
//! removed by position. [`PacketFilter`] wraps exactly those primitives; the
//! parsing is a pure function so it can be tested without a kernel.

use crate::core::error::{Error, Result};
use crate::core::executor::{CommandExecutor, CommandLine, Program};
use crate::core::rules::{Chain, FilterRule, Table, Target};
use tracing::{debug, info, warn};

/// Positions (1-based, ascending) of listing lines that carry `tag`.
///
/// Only rule lines are considered: they start with the line number printed
/// by `--line-numbers`. Chain headers and column titles are skipped.
pub fn parse_tagged_positions(listing: &str, tag: &str) -> Vec<usize> {
    let mut positions: Vec<usize> = listing
        .lines()
        .filter(|line| line.contains(tag))
        .filter_map(|line| line.split_whitespace().next()?.parse::<usize>().ok())
        .collect();
    positions.sort_unstable();
    positions.dedup();
    positions
}

/// Policy from a chain header such as `Chain INPUT (policy DROP 12 packets, 960 bytes)`
pub fn parse_policy(listing: &str) -> Option<&str> {
    let header = listing.lines().next()?;
    let (_, rest) = header.split_once("(policy ")?;
    rest.split([' ', ')']).next().filter(|p| !p.is_empty())
}

/// Rule lines of a listing that carry `tag`
pub fn tagged_lines<'a>(listing: &'a str, tag: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    listing
        .lines()
        .filter(move |line| line.contains(tag))
        .map(str::trim_end)
}

pub trait PacketFilter {
    /// Raw `-L` listing of one chain, with line numbers
    fn listing(&self, table: Table, chain: Chain) -> Result<String>;

    fn delete_at(&self, table: Table, chain: Chain, position: usize) -> Result<()>;

    /// Sets a built-in filter chain policy. Only ACCEPT and DROP are valid.
    fn set_policy(&self, chain: Chain, target: Target) -> Result<()>;

    fn append(&self, rule: &FilterRule) -> Result<()>;

    fn list_tagged(&self, table: Table, chain: Chain, tag: &str) -> Result<Vec<usize>> {
        Ok(parse_tagged_positions(&self.listing(table, chain)?, tag))
    }

    /// Deletes every rule carrying `tag` from the given chains.
    ///
    /// Positions are deleted highest first: each deletion renumbers the
    /// rules after it, so the remaining lower positions stay valid. A chain
    /// that cannot be listed, or a rule that cannot be deleted, is skipped
    /// and reported in [`ClearOutcome::failures`].
    fn clear_tagged(&self, table: Table, chains: &[Chain], tag: &str) -> ClearOutcome {
        let mut outcome = ClearOutcome::default();
        for &chain in chains {
            let positions = match self.list_tagged(table, chain, tag) {
                Ok(positions) => positions,
                Err(e) => {
                    warn!(%table, %chain, error = %e, "could not list chain, skipping cleanup");
                    outcome
                        .failures
                        .push(format!("could not list {table} {chain} to remove {tag} rules: {e}"));
                    continue;
                }
            };

            for &position in positions.iter().rev() {
                match self.delete_at(table, chain, position) {
                    Ok(()) => outcome.removed += 1,
                    Err(e) => {
                        warn!(%table, %chain, position, error = %e, "failed to delete tagged rule");
                        outcome
                            .failures
                            .push(format!("could not delete {table} {chain} rule {position}: {e}"));
                    }
                }
            }
        }

        if outcome.removed > 0 {
            info!(%table, tag, removed = outcome.removed, "removed previously applied rules");
        } else if outcome.failures.is_empty() {
            debug!(%table, tag, "no tagged rules present");
        }
        outcome
    }
}

/// Result of removing tagged rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearOutcome {
    pub removed: usize,
    /// Chains that could not be listed and rules that could not be deleted.
    /// Rules left behind here would be duplicated by the next append.
    pub failures: Vec<String>,
}

impl ClearOutcome {
    pub fn merge(mut self, other: ClearOutcome) -> Self {
        self.removed += other.removed;
        self.failures.extend(other.failures);
        self
    }
}

impl<P: PacketFilter + ?Sized> PacketFilter for &P {
    fn listing(&self, table: Table, chain: Chain) -> Result<String> {
        (**self).listing(table, chain)
    }

    fn delete_at(&self, table: Table, chain: Chain, position: usize) -> Result<()> {
        (**self).delete_at(table, chain, position)
    }

    fn set_policy(&self, chain: Chain, target: Target) -> Result<()> {
        (**self).set_policy(chain, target)
    }

    fn append(&self, rule: &FilterRule) -> Result<()> {
        (**self).append(rule)
    }
}

/// [`PacketFilter`] backed by the `iptables` binary
#[derive(Debug, Clone)]
pub struct Iptables<E> {
    executor: E,
}

impl<E: CommandExecutor> Iptables<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }
}

impl<E: CommandExecutor> PacketFilter for Iptables<E> {
    fn listing(&self, table: Table, chain: Chain) -> Result<String> {
        let cmd = CommandLine::new(
            Program::Iptables,
            ["-t", table.as_ref(), "-L", chain.as_ref(), "-n", "--line-numbers"],
        );
        let output = self.executor.probe(&cmd);
        if output.success {
            Ok(output.stdout)
        } else {
            Err(Error::Command {
                command: cmd.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    fn delete_at(&self, table: Table, chain: Chain, position: usize) -> Result<()> {
        let position = position.to_string();
        let cmd = CommandLine::new(
            Program::Iptables,
            ["-t", table.as_ref(), "-D", chain.as_ref(), position.as_str()],
        );
        self.executor.run_checked(&cmd).map(|_| ())
    }

    fn set_policy(&self, chain: Chain, target: Target) -> Result<()> {
        if !target.is_policy() {
            return Err(Error::Internal(format!("{target} is not a valid chain policy")));
        }
        let cmd = CommandLine::new(
            Program::Iptables,
            ["-t", "filter", "-P", chain.as_ref(), target.as_ref()],
        );
        self.executor.run_checked(&cmd).map(|_| ())
    }

    fn append(&self, rule: &FilterRule) -> Result<()> {
        let cmd = CommandLine::new(Program::Iptables, rule.to_args());
        self.executor.run_checked(&cmd).map(|_| ())
    }
}
