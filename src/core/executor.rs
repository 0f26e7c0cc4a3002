//! External command execution
//!
//! Every mutation YARP makes goes through a [`CommandExecutor`]. The trait has a
//! single required method so tests can substitute a simulated system, while
//! timing and logging of each attempt live in the provided methods and are
//! therefore identical for real and simulated runs.

use crate::core::error::{CommandErrorPattern, Error, Result};
use std::fmt;
use std::io::{Read, Seek, SeekFrom};
use std::process::{Child, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Programs YARP is allowed to spawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
pub enum Program {
    #[strum(serialize = "iptables")]
    Iptables,
    #[strum(serialize = "ip")]
    Ip,
    #[strum(serialize = "sysctl")]
    Sysctl,
    #[strum(serialize = "pgrep")]
    Pgrep,
    #[strum(serialize = "pkill")]
    Pkill,
    #[strum(serialize = "udhcpc")]
    Udhcpc,
}

/// A program invocation: allow-listed binary, argv, optional deadline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: Program,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl CommandLine {
    pub fn new<I, S>(program: Program, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program,
            args: args.into_iter().map(Into::into).collect(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns `true` if the argv contains `needle` as a contiguous run.
    pub fn contains_args(&self, needle: &[&str]) -> bool {
        !needle.is_empty()
            && self
                .args
                .windows(needle.len())
                .any(|w| w.iter().zip(needle).all(|(a, b)| a == b))
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " '{arg}'")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Outcome of one command attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: Some(exit_code),
            stderr: stderr.into(),
            ..Self::default()
        }
    }

    /// The process never ran (missing binary, elevation refused, ...)
    pub fn not_started(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: None,
            stderr: reason.into(),
            ..Self::default()
        }
    }
}

pub trait CommandExecutor {
    /// Runs the command and reports its outcome. Never panics on failure.
    fn execute(&self, cmd: &CommandLine) -> CommandOutput;

    /// Runs a command that changes system state, logging outcome and latency.
    fn run(&self, cmd: &CommandLine) -> CommandOutput {
        let start = Instant::now();
        let output = self.execute(cmd);
        let duration_ms = start.elapsed().as_millis();

        if output.success {
            debug!(command = %cmd, exit_code = ?output.exit_code, duration_ms, "command succeeded");
        } else {
            let hint = CommandErrorPattern::match_error(&output.stderr);
            warn!(
                command = %cmd,
                exit_code = ?output.exit_code,
                duration_ms,
                timed_out = output.timed_out,
                stderr = %output.stderr.trim(),
                hint = %hint,
                "command failed"
            );
        }
        output
    }

    /// Runs a read-only probe. A non-zero exit is an answer, not a failure,
    /// so it is logged at debug level only.
    fn probe(&self, cmd: &CommandLine) -> CommandOutput {
        let start = Instant::now();
        let output = self.execute(cmd);
        debug!(
            command = %cmd,
            exit_code = ?output.exit_code,
            duration_ms = start.elapsed().as_millis(),
            "probe"
        );
        output
    }

    /// "Must succeed" mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Command`] when the command does not exit successfully.
    fn run_checked(&self, cmd: &CommandLine) -> Result<CommandOutput> {
        let output = self.run(cmd);
        if output.success {
            Ok(output)
        } else {
            Err(Error::Command {
                command: cmd.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

impl<E: CommandExecutor + ?Sized> CommandExecutor for &E {
    fn execute(&self, cmd: &CommandLine) -> CommandOutput {
        (**self).execute(cmd)
    }
}

/// Executes commands on the running host
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemExecutor;

impl CommandExecutor for SystemExecutor {
    fn execute(&self, cmd: &CommandLine) -> CommandOutput {
        let mut command = match crate::elevation::elevated_command(cmd.program, &cmd.args) {
            Ok(command) => command,
            Err(e) => return CommandOutput::not_started(e.to_string()),
        };
        command.stdin(Stdio::null());

        match cmd.timeout {
            None => {
                command.stdout(Stdio::piped()).stderr(Stdio::piped());
                match command.output() {
                    Ok(output) => CommandOutput {
                        success: output.status.success(),
                        exit_code: output.status.code(),
                        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                        timed_out: false,
                    },
                    Err(e) => CommandOutput::not_started(format!("Failed to spawn {}: {e}", cmd.program)),
                }
            }
            Some(timeout) => run_with_deadline(command, cmd.program, timeout),
        }
    }
}

/// Spawns with output captured in anonymous temp files so the wait loop
/// never blocks on a full pipe.
fn run_with_deadline(
    mut command: std::process::Command,
    program: Program,
    timeout: Duration,
) -> CommandOutput {
    let (mut out_file, mut err_file) = match (tempfile::tempfile(), tempfile::tempfile()) {
        (Ok(o), Ok(e)) => (o, e),
        (Err(e), _) | (_, Err(e)) => {
            return CommandOutput::not_started(format!("Failed to create capture file: {e}"));
        }
    };

    let (stdout, stderr) = match (out_file.try_clone(), err_file.try_clone()) {
        (Ok(o), Ok(e)) => (o, e),
        (Err(e), _) | (_, Err(e)) => {
            return CommandOutput::not_started(format!("Failed to create capture file: {e}"));
        }
    };
    command.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));

    let child = match command.spawn() {
        Ok(child) => child,
        Err(e) => return CommandOutput::not_started(format!("Failed to spawn {program}: {e}")),
    };

    let (status, timed_out) = match wait_until(child, timeout) {
        Ok(result) => result,
        Err(e) => return CommandOutput::not_started(format!("Failed to wait for {program}: {e}")),
    };

    let stdout = read_capture(&mut out_file, program);
    let mut stderr = read_capture(&mut err_file, program);
    if timed_out {
        stderr.push_str(&format!("{program} timed out after {}s", timeout.as_secs()));
    }

    CommandOutput {
        success: !timed_out && status.is_some_and(|s| s.success()),
        exit_code: status.and_then(|s| s.code()),
        stdout,
        stderr,
        timed_out,
    }
}

/// Whole capture file, decoded the same lossy way as piped output
fn read_capture(file: &mut std::fs::File, program: Program) -> String {
    let mut bytes = Vec::new();
    if let Err(e) = file
        .seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_end(&mut bytes))
    {
        warn!(%program, error = %e, "could not read captured output");
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

fn wait_until(
    mut child: Child,
    timeout: Duration,
) -> std::io::Result<(Option<std::process::ExitStatus>, bool)> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((Some(status), false));
        }
        if Instant::now() >= deadline {
            child.kill()?;
            child.wait()?;
            return Ok((None, true));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_keeps_invalid_utf8_output() {
        use std::io::Write as _;

        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"inet 10.0.0.2/24 \xff\xfe dev wan0\n").unwrap();

        let text = read_capture(&mut file, Program::Ip);
        assert_eq!(text, "inet 10.0.0.2/24 \u{fffd}\u{fffd} dev wan0\n");
    }

    #[test]
    fn test_command_line_display_quotes_whitespace() {
        let cmd = CommandLine::new(Program::Pgrep, ["-f", "udhcpc.* wan0"]);
        assert_eq!(cmd.to_string(), "pgrep -f 'udhcpc.* wan0'");
    }

    #[test]
    fn test_contains_args() {
        let cmd = CommandLine::new(Program::Iptables, ["-t", "nat", "-A", "POSTROUTING"]);
        assert!(cmd.contains_args(&["-A", "POSTROUTING"]));
        assert!(!cmd.contains_args(&["-A", "FORWARD"]));
        assert!(!cmd.contains_args(&[]));
    }

    #[test]
    fn test_run_checked_reports_command() {
        struct Failing;
        impl CommandExecutor for Failing {
            fn execute(&self, _cmd: &CommandLine) -> CommandOutput {
                CommandOutput::failed(4, "iptables: Resource temporarily unavailable.\n")
            }
        }

        let cmd = CommandLine::new(Program::Iptables, ["-P", "INPUT", "DROP"]);
        match Failing.run_checked(&cmd) {
            Err(Error::Command {
                command,
                exit_code,
                stderr,
            }) => {
                assert_eq!(command, "iptables -P INPUT DROP");
                assert_eq!(exit_code, Some(4));
                assert_eq!(stderr, "iptables: Resource temporarily unavailable.");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_run_with_deadline_kills_slow_child() {
        let mut command = std::process::Command::new("sh");
        command.args(["-c", "sleep 5"]);
        let output = run_with_deadline(command, Program::Udhcpc, Duration::from_millis(200));
        assert!(output.timed_out);
        assert!(!output.success);
        assert!(output.stderr.contains("timed out"));
    }

    #[test]
    fn test_run_with_deadline_captures_output() {
        let mut command = std::process::Command::new("sh");
        command.args(["-c", "echo lease obtained; echo warn >&2"]);
        let output = run_with_deadline(command, Program::Udhcpc, Duration::from_secs(5));
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "lease obtained");
        assert_eq!(output.stderr.trim(), "warn");
    }
}
