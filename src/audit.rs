/// Audit logging for every change YARP makes to the host
///
/// Each subsystem apply or clear appends one JSON object per line recording
/// what was attempted and how it ended. The audit trail is best effort: a
/// write failure is logged as a warning and never fails the run.
use crate::core::report::{ApplyReport, Subsystem};
use serde::{Deserialize, Serialize};
use std::io::Write as _;
use std::path::{Path, PathBuf};

pub const DEFAULT_AUDIT_PATH: &str = "/var/log/yarp/audit.log";

/// Types of auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Apply,
    Clear,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    pub subsystem: Subsystem,

    pub action: Action,

    /// Every counted unit applied and no prerequisite failed
    pub success: bool,

    pub applied: usize,

    pub total: usize,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    /// Prerequisite failure that stopped the subsystem
    pub error: Option<String>,
}

impl AuditEvent {
    /// Event for a subsystem run that produced a report
    pub fn from_report(action: Action, report: &ApplyReport) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            subsystem: report.subsystem,
            action,
            success: report.is_success(),
            applied: report.applied,
            total: report.total,
            warnings: report.warnings.clone(),
            error: None,
        }
    }

    /// Event for a subsystem run that stopped with an error
    pub fn failed(action: Action, subsystem: Subsystem, error: impl ToString) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            subsystem,
            action,
            success: false,
            applied: 0,
            total: 0,
            warnings: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

impl std::fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mark = if self.success { "✓" } else { "✗" };
        write!(
            f,
            "{} {mark} {:?} {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.action,
            self.subsystem
        )?;
        match &self.error {
            Some(error) => write!(f, ": {error}"),
            None => {
                write!(f, ": {}/{} applied", self.applied, self.total)?;
                match self.warnings.len() {
                    0 => Ok(()),
                    n => write!(f, " ({n} warning(s))"),
                }
            }
        }
    }
}

/// Audit log writer
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
        }
    }

    /// Log at `configured`, or the system default location
    pub fn at(configured: Option<&Path>) -> Self {
        Self::new(configured.unwrap_or(Path::new(DEFAULT_AUDIT_PATH)))
    }

    /// Appends an event to the audit log
    ///
    /// Events are written as JSON-lines format (one JSON object per line)
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub fn log(&self, event: &AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(event)?;

        if let Some(parent) = self.log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;

        Ok(())
    }

    /// Appends `event`, downgrading any failure to a warning
    pub fn record(&self, event: &AuditEvent) {
        if let Err(e) = self.log(event) {
            tracing::warn!(path = %self.log_path.display(), "Failed to write audit log: {}", e);
        }
    }

    /// Reads the most recent events from the log, newest first
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be read
    pub fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = std::fs::read_to_string(&self.log_path)?;

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(events)
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}
