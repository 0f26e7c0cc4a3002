//! Privilege elevation for system operations
//!
//! YARP normally runs as root from a boot script, in which case commands are
//! spawned directly. When started by an unprivileged operator (for example
//! `yarp show firewall` from a login shell) every command is wrapped with an
//! elevation helper instead.
//!
//! # Elevation Strategy
//!
//! - **Root**: run the program directly
//! - **Preferred**: `run0` when available (systemd v256+, no SUID)
//! - **Terminal fallback**: `sudo`
//! - **Non-interactive fallback**: `pkexec`
//!
//! # Environment Variables
//!
//! - `YARP_ELEVATION_METHOD`: Force a specific elevation method (`sudo`, `run0`, or `pkexec`).
//!   Useful for scripts with sudoers NOPASSWD rules.
//! - `YARP_TEST_NO_ELEVATION`: Bypass elevation entirely (for testing only).
//!
//! # Security
//!
//! - Only allow-listed programs ([`Program`]) can be spawned
//! - Arguments are passed as argv, never through a shell

use crate::core::executor::Program;
use std::io;
use std::process::Command;

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// pkexec binary not found in PATH
    #[error("pkexec not found - please install PolicyKit")]
    PkexecNotFound,

    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    /// Invalid value for `YARP_ELEVATION_METHOD`
    #[error("Invalid YARP_ELEVATION_METHOD '{0}'. Valid options: sudo, run0, pkexec")]
    InvalidMethod(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Checks if a binary exists in PATH
fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

fn wrapped(helper: &str, program: Program, args: &[String]) -> Command {
    let mut cmd = Command::new(helper);
    cmd.arg(program.as_ref()).args(args);
    cmd
}

/// Builds a [`Command`] for an allow-listed program, elevated if needed.
///
/// # Errors
///
/// Returns `Err` if `YARP_ELEVATION_METHOD` names an unknown or missing
/// helper, or if no helper is available for a non-root, non-interactive run.
pub fn elevated_command(program: Program, args: &[String]) -> Result<Command, ElevationError> {
    use std::os::fd::AsFd;

    // 1. Test mode override
    if std::env::var("YARP_TEST_NO_ELEVATION").is_ok() {
        let mut cmd = Command::new(program.as_ref());
        cmd.args(args);
        return Ok(cmd);
    }

    // 2. Direct root execution
    if nix::unistd::getuid().is_root() {
        let mut cmd = Command::new(program.as_ref());
        cmd.args(args);
        return Ok(cmd);
    }

    // 3. Explicit elevation method override
    if let Ok(method) = std::env::var("YARP_ELEVATION_METHOD") {
        let method = method.to_lowercase();
        if !method.is_empty() {
            return match method.as_str() {
                "sudo" | "run0" | "pkexec" => {
                    if !binary_exists(&method) {
                        return Err(ElevationError::MethodNotAvailable(method));
                    }
                    Ok(wrapped(&method, program, args))
                }
                _ => Err(ElevationError::InvalidMethod(method)),
            };
        }
    }

    // 4. Automatic detection
    if binary_exists("run0") {
        return Ok(wrapped("run0", program, args));
    }

    let is_atty = nix::unistd::isatty(std::io::stdin().as_fd()).unwrap_or(false);
    if is_atty {
        Ok(wrapped("sudo", program, args))
    } else {
        if !binary_exists("pkexec") {
            return Err(ElevationError::PkexecNotFound);
        }
        Ok(wrapped("pkexec", program, args))
    }
}
