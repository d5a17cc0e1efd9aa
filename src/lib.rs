//! dualtor-io -- data-plane I/O harness for dual-ToR switch testbeds.
//!
//! This crate provides traffic runs coordinated around a fault action,
//! per-endpoint delivery records, and the classifier that judges them
//! against disruption and duplication thresholds.

pub mod config;
pub mod dataplane;
pub mod device;
pub mod evidence;
pub mod flow;
pub mod io;
pub mod record;
pub mod verify;
