//! Logging setup from the document's `logging` section
//!
//! One subscriber is built per run and installed with
//! [`tracing::subscriber::with_default`] around it, so nothing is registered
//! process-wide. Sinks:
//!
//! - console (stderr) in `minimal`, `simple` or `detailed` layout
//! - `files.application`: everything the level filter lets through
//! - `files.error`: errors only
//! - `files.debug`: everything at debug, only when `debug = true`
//!
//! File sinks left unset use the defaults under `/var/log/yarp/`.
//!
//! `RUST_LOG`, when set, replaces the level directives for the console and
//! the application file.

use crate::core::document::{ConsoleFormat, FileFormat, LogFiles, LoggingSpec};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::{EnvFilter, Layer, Registry};

pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Subscriber type produced by [`build`]
pub type RunSubscriber = Layered<Vec<BoxedLayer>, Registry>;

pub const DEFAULT_APPLICATION_LOG: &str = "/var/log/yarp/apply.log";
pub const DEFAULT_ERROR_LOG: &str = "/var/log/yarp/error.log";
pub const DEFAULT_DEBUG_LOG: &str = "/var/log/yarp/debug.log";

/// `files` with every unset application, error and debug sink given its
/// default path. The audit path is resolved by [`crate::audit::AuditLog::at`].
pub fn with_default_files(files: &LogFiles) -> LogFiles {
    let or_default = |path: &Option<PathBuf>, default: &str| {
        Some(path.clone().unwrap_or_else(|| PathBuf::from(default)))
    };
    LogFiles {
        application: or_default(&files.application, DEFAULT_APPLICATION_LOG),
        error: or_default(&files.error, DEFAULT_ERROR_LOG),
        debug: or_default(&files.debug, DEFAULT_DEBUG_LOG),
        audit: files.audit.clone(),
    }
}

/// Module path that logs for each subsystem name
fn module_target(module: &str) -> Option<&'static str> {
    match module {
        "network" => Some("yarp::core::addressing"),
        "dns" => Some("yarp::core::resolver"),
        "routing" => Some("yarp::core::routing"),
        "firewall" => Some("yarp::core::firewall"),
        "nat" => Some("yarp::core::nat"),
        _ => None,
    }
}

fn level_name(level: Level) -> String {
    level.as_str().to_ascii_lowercase()
}

/// Filter directives for `spec`.
///
/// Each per-module level is emitted twice: once for the module's own target,
/// and once for its span so that command logs from inside the subsystem
/// follow the same level.
pub fn directives(spec: &LoggingSpec) -> String {
    let base = if spec.debug {
        Level::DEBUG
    } else {
        spec.level.unwrap_or(Level::INFO)
    };

    let mut directives = vec![level_name(base)];
    for (module, level) in &spec.modules {
        let level = level_name(*level);
        if let Some(target) = module_target(module) {
            directives.push(format!("{target}={level}"));
        }
        directives.push(format!("[{module}]={level}"));
    }
    directives.join(",")
}

fn env_filter(spec: &LoggingSpec) -> EnvFilter {
    match std::env::var("RUST_LOG") {
        Ok(value) if !value.trim().is_empty() => EnvFilter::new(value),
        _ => EnvFilter::new(directives(spec)),
    }
}

fn console_layer(format: ConsoleFormat, filter: EnvFilter) -> BoxedLayer {
    let layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    match format {
        ConsoleFormat::Minimal => layer
            .without_time()
            .with_level(false)
            .with_target(false)
            .with_filter(filter)
            .boxed(),
        ConsoleFormat::Simple => layer
            .without_time()
            .with_target(false)
            .with_filter(filter)
            .boxed(),
        ConsoleFormat::Detailed => layer.with_filter(filter).boxed(),
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

fn file_layer<F>(format: FileFormat, file: File, filter: F) -> BoxedLayer
where
    F: tracing_subscriber::layer::Filter<Registry> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false);
    match format {
        FileFormat::Json => layer.json().with_filter(filter).boxed(),
        FileFormat::Simple => layer.with_target(false).with_filter(filter).boxed(),
        FileFormat::Detailed => layer
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_filter(filter)
            .boxed(),
    }
}

/// A subscriber for one run plus the problems met while building it.
///
/// A file sink that cannot be opened is skipped; the returned messages
/// should be logged once the subscriber is active.
pub fn build(spec: &LoggingSpec) -> (RunSubscriber, Vec<String>) {
    let mut layers: Vec<BoxedLayer> = vec![console_layer(spec.console, env_filter(spec))];
    let mut problems = Vec::new();

    let mut sink = |path: Option<&Path>, make: &dyn Fn(File) -> BoxedLayer| {
        let Some(path) = path else { return };
        match open_append(path) {
            Ok(file) => layers.push(make(file)),
            Err(e) => problems.push(format!("cannot open log file {}: {e}", path.display())),
        }
    };

    let format = spec.file_format;
    sink(spec.files.application.as_deref(), &|file| {
        file_layer(format, file, env_filter(spec))
    });
    sink(spec.files.error.as_deref(), &|file| {
        file_layer(format, file, LevelFilter::ERROR)
    });
    if spec.debug {
        sink(spec.files.debug.as_deref(), &|file| {
            file_layer(format, file, LevelFilter::DEBUG)
        });
    }

    (tracing_subscriber::registry().with(layers), problems)
}

/// Runs `f` with the subscriber for `spec` as the default, writing to the
/// default log files for any sink the document leaves unset.
pub fn with_logging<T>(spec: &LoggingSpec, f: impl FnOnce() -> T) -> T {
    let spec = LoggingSpec {
        files: with_default_files(&spec.files),
        ..spec.clone()
    };
    let (subscriber, problems) = build(&spec);
    tracing::subscriber::with_default(subscriber, || {
        for problem in &problems {
            tracing::warn!("{problem}");
        }
        f()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_default_directives() {
        assert_eq!(directives(&LoggingSpec::default()), "info");
    }

    #[test]
    fn test_debug_forces_debug() {
        let spec = LoggingSpec {
            level: Some(Level::WARN),
            debug: true,
            ..LoggingSpec::default()
        };
        assert_eq!(directives(&spec), "debug");
    }

    #[test]
    fn test_module_directives() {
        let mut modules = IndexMap::new();
        modules.insert("firewall".to_string(), Level::TRACE);
        modules.insert("dns".to_string(), Level::ERROR);
        let spec = LoggingSpec {
            level: Some(Level::WARN),
            modules,
            ..LoggingSpec::default()
        };
        assert_eq!(
            directives(&spec),
            "warn,yarp::core::firewall=trace,[firewall]=trace,yarp::core::resolver=error,[dns]=error"
        );
    }

    #[test]
    fn test_every_module_has_a_target() {
        for module in crate::core::validate::LOG_MODULES {
            assert!(module_target(module).is_some(), "{module}");
        }
    }

    #[test]
    fn test_unset_files_use_defaults() {
        let files = with_default_files(&LogFiles {
            error: Some(PathBuf::from("/srv/log/errors.log")),
            ..LogFiles::default()
        });
        assert_eq!(files.application, Some(PathBuf::from(DEFAULT_APPLICATION_LOG)));
        assert_eq!(files.error, Some(PathBuf::from("/srv/log/errors.log")));
        assert_eq!(files.debug, Some(PathBuf::from(DEFAULT_DEBUG_LOG)));
        assert_eq!(files.audit, None);
    }

    #[test]
    fn test_file_sinks_receive_events() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("logs/app.log");
        let errors = dir.path().join("logs/error.log");
        let spec = LoggingSpec {
            file_format: FileFormat::Simple,
            files: crate::core::document::LogFiles {
                application: Some(app.clone()),
                error: Some(errors.clone()),
                ..Default::default()
            },
            ..LoggingSpec::default()
        };

        with_logging(&spec, || {
            tracing::info!("interfaces configured");
            tracing::error!("failed to add route");
        });

        let app_text = std::fs::read_to_string(&app).unwrap();
        assert!(app_text.contains("interfaces configured"));
        assert!(app_text.contains("failed to add route"));
        let error_text = std::fs::read_to_string(&errors).unwrap();
        assert!(!error_text.contains("interfaces configured"));
        assert!(error_text.contains("failed to add route"));
    }

    #[test]
    fn test_unwritable_sink_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "").unwrap();
        let spec = LoggingSpec {
            files: crate::core::document::LogFiles {
                application: Some(blocker.join("app.log")),
                ..Default::default()
            },
            ..LoggingSpec::default()
        };
        let (_subscriber, problems) = build(&spec);
        assert_eq!(problems.len(), 1);
    }
}
