//! Core reconciliation functionality
//!
//! This module contains the document model and the subsystem managers that
//! drive the host toward it. It provides:
//!
//! - [`document`] / [`validate`]: Typed configuration and the rules that produce it
//! - [`executor`]: The single gateway for spawning system tools
//! - [`packet_filter`] / [`rules`]: Tagged iptables rules and their lifecycle primitives
//! - [`firewall`] / [`nat`]: Filter policy, user rules and masquerading
//! - [`addressing`] / [`routing`] / [`resolver`]: Interface addresses, static routes, resolv.conf
//! - [`report`]: Per-subsystem outcome counting
//! - [`error`]: Error types and command error translation

pub mod addressing;
pub mod document;
pub mod error;
pub mod executor;
pub mod firewall;
pub mod nat;
pub mod packet_filter;
pub mod ports;
pub mod report;
pub mod resolver;
pub mod routing;
pub mod rules;
pub mod validate;

#[cfg(test)]
pub mod test_helpers;
