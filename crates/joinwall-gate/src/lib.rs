//! IP admission gate for the joinwall admin panel.
//!
//! [`IpGate`] answers "is this address blocked" from memory and mirrors every
//! change into the record store. [`ClientIpResolver`] decides which address a
//! request belongs to.

pub mod client_ip;
pub mod error;
pub mod gate;
pub mod simulation;

#[cfg(test)]
pub mod proptest;

pub use client_ip::{ClientIpResolver, ForwardedPolicy};
pub use error::{GateError, Result};
pub use gate::{normalize_ip, GateOptions, IpGate, DEFAULT_BLOCK_REASON};
pub use simulation::synthetic_ip_for_user;
