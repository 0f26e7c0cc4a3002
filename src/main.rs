//! YARP - Yet Another Router Provisioner
//!
//! Reconciles one Linux host toward a declarative document.
//!
//! # Usage
//!
//! ```bash
//! yarp validate                       # Check the document, change nothing
//! yarp apply                          # network, dns, routing, firewall, nat
//! yarp apply firewall                 # One subsystem only
//! yarp show nat                       # Current state of a subsystem
//! yarp clear routing                  # Remove what apply installed
//! yarp history -n 5                   # Most recent audit events
//! yarp --config ./router.toml apply   # Explicit document path
//! ```
//!
//! Exit status is 0 only when every attempted subsystem fully succeeded.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use yarp::audit::{Action, AuditEvent, AuditLog};
use yarp::core::addressing::AddressingPlanner;
use yarp::core::executor::SystemExecutor;
use yarp::core::firewall::FirewallManager;
use yarp::core::nat::NatManager;
use yarp::core::packet_filter::Iptables;
use yarp::core::resolver::ResolverWriter;
use yarp::core::routing::RouteApplier;
use yarp::{ApplyReport, ConfigDocument, Error, Result, Subsystem, config, logging};

#[derive(Parser)]
#[command(name = "yarp", version)]
#[command(about = "Yet Another Router Provisioner - declarative host network reconciler", long_about = None)]
struct Cli {
    /// Configuration document (default: $YARP_CONFIG, then /etc/yarp/config.toml)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the document without changing anything
    Validate,
    /// Drive the host toward the document
    Apply {
        /// network, dns, routing, firewall or nat (default: all, in that order)
        subsystem: Option<Subsystem>,
    },
    /// Show the current state of a subsystem
    Show {
        /// network, dns, routing, firewall or nat
        subsystem: Subsystem,
    },
    /// Remove what apply installed for a subsystem
    Clear {
        /// network, dns, routing, firewall or nat
        subsystem: Subsystem,
    },
    /// Show the most recent audit events, newest first
    History {
        /// Number of events to show
        #[arg(short = 'n', long, default_value_t = 20)]
        count: usize,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let path = config::resolve_path(cli.config.as_deref());

    let doc = match config::load(&path) {
        Ok(doc) => doc,
        Err(Error::Validation(issues)) => {
            eprintln!("{} has {} validation error(s):", path.display(), issues.len());
            for issue in &issues {
                eprintln!("  - {issue}");
            }
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let success = logging::with_logging(&doc.logging, || run(&cli.command, &doc, &path));
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run(command: &Commands, doc: &ConfigDocument, path: &Path) -> bool {
    let audit = AuditLog::at(doc.logging.files.audit.as_deref());

    match command {
        Commands::Validate => {
            println!("✓ {} is valid", path.display());
            println!(
                "  {} interface(s), {} static route(s), {} firewall rule(s)",
                doc.interfaces.len(),
                doc.routes.len(),
                doc.firewall.as_ref().map_or(0, |fw| fw.rules.len())
            );
            true
        }
        Commands::Apply { subsystem } => {
            let targets = subsystem.map_or_else(|| Subsystem::APPLY_ORDER.to_vec(), |s| vec![s]);
            info!(config = %path.display(), subsystems = targets.len(), "reconciliation started");

            // Every subsystem runs even if an earlier one failed
            let mut success = true;
            for subsystem in targets {
                let outcome = apply(subsystem, doc);
                success &= finish(Action::Apply, subsystem, outcome, &audit);
            }

            if success {
                info!("reconciliation complete");
            } else {
                error!("reconciliation finished with failures");
            }
            success
        }
        Commands::Show { subsystem } => match show(*subsystem, doc) {
            Ok(text) => {
                print!("{text}");
                true
            }
            Err(e) => {
                eprintln!("Error: {e}");
                false
            }
        },
        Commands::Clear { subsystem } => {
            let report = clear(*subsystem, doc);
            finish(Action::Clear, *subsystem, Ok(report), &audit)
        }
        Commands::History { count } => match audit.read_recent(*count) {
            Ok(events) if events.is_empty() => {
                println!("No audit events in {}", audit.path().display());
                true
            }
            Ok(events) => {
                for event in &events {
                    println!("{event}");
                }
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                println!("No audit events in {}", audit.path().display());
                true
            }
            Err(e) => {
                eprintln!("Error: could not read {}: {e}", audit.path().display());
                false
            }
        },
    }
}

fn apply(subsystem: Subsystem, doc: &ConfigDocument) -> Result<ApplyReport> {
    let executor = SystemExecutor;
    match subsystem {
        Subsystem::Network => Ok(AddressingPlanner::new(executor).apply(doc)),
        Subsystem::Dns => ResolverWriter::default().apply(doc),
        Subsystem::Routing => Ok(RouteApplier::new(executor).apply(doc)),
        Subsystem::Firewall => FirewallManager::new(Iptables::new(executor)).apply(doc.firewall.as_ref()),
        Subsystem::Nat => NatManager::new(Iptables::new(executor), executor).apply(doc),
    }
}

fn clear(subsystem: Subsystem, doc: &ConfigDocument) -> ApplyReport {
    let executor = SystemExecutor;
    match subsystem {
        Subsystem::Network => AddressingPlanner::new(executor).clear(doc),
        Subsystem::Dns => ResolverWriter::default().clear(),
        Subsystem::Routing => RouteApplier::new(executor).clear(doc),
        Subsystem::Firewall => FirewallManager::new(Iptables::new(executor)).clear(),
        Subsystem::Nat => NatManager::new(Iptables::new(executor), executor).clear(),
    }
}

fn show(subsystem: Subsystem, doc: &ConfigDocument) -> Result<String> {
    let executor = SystemExecutor;
    match subsystem {
        Subsystem::Network => Ok(AddressingPlanner::new(executor).show(doc)),
        Subsystem::Dns => Ok(ResolverWriter::default().show(doc)),
        Subsystem::Routing => Ok(RouteApplier::new(executor).show(doc)),
        Subsystem::Firewall => FirewallManager::new(Iptables::new(executor)).show(),
        Subsystem::Nat => NatManager::new(Iptables::new(executor), executor).show(),
    }
}

/// Prints and audits one subsystem outcome. Returns whether it fully succeeded.
fn finish(action: Action, subsystem: Subsystem, outcome: Result<ApplyReport>, audit: &AuditLog) -> bool {
    match outcome {
        Ok(report) => {
            audit.record(&AuditEvent::from_report(action, &report));
            let mark = if report.is_success() { "✓" } else { "✗" };
            println!("{mark} {report}");
            for warning in &report.warnings {
                println!("    warning: {warning}");
            }
            report.is_success()
        }
        Err(e) => {
            audit.record(&AuditEvent::failed(action, subsystem, &e));
            error!(%subsystem, error = %e, "subsystem aborted");
            println!("✗ {subsystem}: {e}");
            false
        }
    }
}
