//! YARP - Yet Another Router Provisioner
//!
//! A declarative reconciler for a single Linux host acting as a router:
//! interface addressing, resolver configuration, static routes, the iptables
//! filter table and masquerading.
//!
//! # Architecture
//!
//! - [`config`] - Document loading (TOML or JSON) into a validated model
//! - [`core`] - Document model, validation, and the per-subsystem managers
//! - [`audit`] - JSON-lines audit trail of every apply and clear
//! - [`logging`] - Per-run tracing subscriber from the `logging` section
//! - [`elevation`] - Privilege escalation for system commands
//! - [`validators`] - Input validation and sanitization
//!
//! # Safety Features
//!
//! - The whole document is validated before anything is changed
//! - Every managed rule carries a `YARP-` tag and is removed before re-applying
//! - Commands are spawned from an allow-list with argv, never through a shell
//! - Atomic resolver writes with a one-time backup of the original file

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod elevation;
pub mod logging;
pub mod validators;

// Re-export commonly used types
pub use crate::core::document::ConfigDocument;
pub use crate::core::error::{Error, Result};
pub use crate::core::report::{ApplyReport, Subsystem};
