use std::fmt;
use thiserror::Error;

/// Core error types for YARP
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The document could not be parsed into a tree at all
    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    /// The document parsed but violates one or more semantic rules
    #[error("Configuration has {} validation error(s)", .0.len())]
    Validation(Vec<ValidationIssue>),

    /// A foundational step failed; the subsystem run stops here
    #[error("{step} failed: {message}")]
    Prerequisite { step: String, message: String },

    /// A command run in "must succeed" mode exited non-zero
    #[error("command failed ({command}): {stderr}")]
    Command {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// One semantic violation found while validating a document.
///
/// `path` is a dotted location such as `firewall.rules[2].protocols.tcp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

impl fmt::Display for ErrorTranslation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message)?;
        if !self.suggestions.is_empty() {
            write!(f, " (try: {})", self.suggestions.join("; "))?;
        }
        Ok(())
    }
}

/// Known stderr patterns from iptables, iproute2, sysctl and udhcpc
pub struct CommandErrorPattern;

impl CommandErrorPattern {
    /// Matches command stderr against known patterns and returns an operator hint.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        if lower.contains("permission denied")
            || lower.contains("operation not permitted")
            || lower.contains("you must be root")
        {
            return ErrorTranslation::new("Insufficient privileges to change network state")
                .with_suggestion("Run yarp as root or set YARP_ELEVATION_METHOD")
                .with_suggestion("Check that CAP_NET_ADMIN is available in this context");
        }

        if lower.contains("no such file") || lower.contains("command not found") {
            return ErrorTranslation::new("Required network tool is not installed")
                .with_suggestion("Install iptables, iproute2 and udhcpc (busybox)")
                .with_suggestion("Verify the binaries are in PATH for the elevated user");
        }

        if lower.contains("file exists") {
            return ErrorTranslation::new("Entry already present in the kernel table")
                .with_suggestion("This is expected when re-applying the same document");
        }

        if lower.contains("cannot find device") || lower.contains("does not exist") {
            return ErrorTranslation::new("Network interface not found")
                .with_suggestion("Check available interfaces: ip link show")
                .with_suggestion("Interface names are case-sensitive and max 15 chars");
        }

        if lower.contains("no chain/target/match by that name") {
            return ErrorTranslation::new("Chain, target or match module unavailable")
                .with_suggestion("Load the matching netfilter module (xt_comment, xt_multiport, xt_conntrack)")
                .with_suggestion("Check kernel modules: lsmod | grep xt_");
        }

        if lower.contains("bad argument") || lower.contains("invalid port") {
            return ErrorTranslation::new("Invalid rule argument")
                .with_suggestion("Port numbers must be between 1 and 65535")
                .with_suggestion("Port ranges use start:end with start <= end");
        }

        if lower.contains("resource temporarily unavailable")
            || lower.contains("another app is currently holding the xtables lock")
        {
            return ErrorTranslation::new("Packet filter is locked by another process")
                .with_suggestion("Another firewall manager may be running (firewalld, ufw)")
                .with_suggestion("Wait a moment and re-run the reconciliation");
        }

        if lower.contains("network is unreachable") || lower.contains("nexthop has invalid gateway") {
            return ErrorTranslation::new("Gateway is not reachable on any configured link")
                .with_suggestion("Apply interface addressing before static routes");
        }

        if lower.contains("timed out") || lower.contains("timeout") {
            return ErrorTranslation::new("Operation timed out")
                .with_suggestion("Check link state and whether a DHCP server answers on this segment");
        }

        ErrorTranslation::new(format!("Command error: {msg}"))
            .with_suggestion("Re-run with logging.debug = true for the full command trace")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
