//! Resolver configuration (`/etc/resolv.conf`)
//!
//! The file is regenerated wholesale from `system.domain` and
//! `system.dns_servers`. The first time YARP touches it, the original is
//! copied to `<path>.yarp-backup`; later runs never overwrite that backup,
//! so `yarp clear dns` always restores the pre-YARP file.

use crate::core::document::ConfigDocument;
use crate::core::error::{Error, Result};
use crate::core::report::{ApplyReport, Subsystem};
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use tracing::{info, info_span, warn};

pub const RESOLV_CONF: &str = "/etc/resolv.conf";
pub const BACKUP_SUFFIX: &str = ".yarp-backup";

/// File contents for the declared domain and servers, or `None` when
/// neither is declared and the file must be left alone.
pub fn render(doc: &ConfigDocument) -> Option<String> {
    let domain = doc.domain();
    let servers = doc.dns_servers();
    if domain.is_none() && servers.is_empty() {
        return None;
    }

    let mut out = String::from(
        "# Generated by YARP - do not edit by hand\n# Changes are overwritten by 'yarp apply'\n",
    );
    if let Some(domain) = domain {
        let _ = writeln!(out, "domain {domain}");
        let _ = writeln!(out, "search {domain}");
    }
    for server in servers {
        let _ = writeln!(out, "nameserver {server}");
    }
    Some(out)
}

pub struct ResolverWriter {
    path: PathBuf,
    backup: PathBuf,
}

impl Default for ResolverWriter {
    fn default() -> Self {
        Self::new(RESOLV_CONF)
    }
}

impl ResolverWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut backup = path.clone().into_os_string();
        backup.push(BACKUP_SUFFIX);
        Self {
            path,
            backup: PathBuf::from(backup),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup
    }

    /// Copies the current file aside unless a backup already exists.
    /// Returns whether a copy was made.
    fn backup_once(&self) -> std::io::Result<bool> {
        if self.backup.exists() || !self.path.exists() {
            return Ok(false);
        }
        std::fs::copy(&self.path, &self.backup)?;
        info!(backup = %self.backup.display(), "saved original resolver configuration");
        Ok(true)
    }

    /// Writes through a temp file in the same directory, then renames.
    fn write_atomic(&self, contents: &str) -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o644))?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Regenerates the resolver file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Prerequisite`] if the original file cannot be backed
    /// up; the file is not touched in that case. A failed write is counted
    /// in the report.
    pub fn apply(&self, doc: &ConfigDocument) -> Result<ApplyReport> {
        let _span = info_span!("dns").entered();
        let mut report = ApplyReport::new(Subsystem::Dns);

        let Some(contents) = render(doc) else {
            info!(path = %self.path.display(), "no domain or DNS servers declared, leaving file unchanged");
            return Ok(report);
        };

        self.backup_once().map_err(|e| Error::Prerequisite {
            step: format!("backing up {}", self.path.display()),
            message: e.to_string(),
        })?;

        match self.write_atomic(&contents) {
            Ok(()) => {
                info!(
                    path = %self.path.display(),
                    domain = doc.domain().unwrap_or("-"),
                    servers = doc.dns_servers().len(),
                    "resolver configuration written"
                );
                report.record(true);
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "could not write resolver configuration");
                report.record(false);
            }
        }
        Ok(report)
    }

    /// Restores the backup taken on first apply, if any.
    pub fn clear(&self) -> ApplyReport {
        let _span = info_span!("dns").entered();
        let mut report = ApplyReport::new(Subsystem::Dns);

        if !self.backup.exists() {
            info!(backup = %self.backup.display(), "no backup to restore");
            return report;
        }

        let restored = std::fs::read_to_string(&self.backup)
            .and_then(|original| self.write_atomic(&original))
            .and_then(|()| std::fs::remove_file(&self.backup));
        match &restored {
            Ok(()) => info!(path = %self.path.display(), "original resolver configuration restored"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "could not restore backup"),
        }
        report.record(restored.is_ok());
        report
    }

    /// Declared settings, the current file, and the change `apply` would make.
    pub fn show(&self, doc: &ConfigDocument) -> String {
        let mut out = String::from("=== DNS ===\n");
        if let Some(domain) = doc.domain() {
            let _ = writeln!(out, "Domain: {domain}");
        }
        if !doc.dns_servers().is_empty() {
            let _ = writeln!(out, "Servers:");
            for server in doc.dns_servers() {
                let _ = writeln!(out, "  - {server}");
            }
        }

        let current = std::fs::read_to_string(&self.path).ok();
        let _ = writeln!(out, "\n=== {} ===", self.path.display());
        out.push_str(current.as_deref().unwrap_or("(absent)\n"));

        if let Some(generated) = render(doc) {
            let current = current.unwrap_or_default();
            if current == generated {
                let _ = writeln!(out, "\nUp to date.");
            } else {
                let diff = similar::TextDiff::from_lines(current.as_str(), generated.as_str());
                let _ = writeln!(out, "\n=== Pending changes ===");
                let _ = write!(
                    out,
                    "{}",
                    diff.unified_diff().header("current", "generated")
                );
            }
        }
        out
    }
}
