//! Wallet provisioning and mediator connection bootstrap for an Aries agent.
//!
//! The binary in `main.rs` wires these modules together; integration tests
//! drive [`bootstrap::BootstrapOrchestrator`] with their own collaborators.

pub mod agent;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod logger;
