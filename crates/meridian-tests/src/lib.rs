//! # meridian-tests
//!
//! Integration tests for the peer sync core.
//!
//! This crate provides:
//! - In-memory chain, partial chain and mempool implementing the collaborator traits
//! - A loopback wiring two light sync agents to each other
//! - Scenario tests for inventory exchange, relay, proofs and light sync
//! - Property-based tests for inventory and relay invariants

pub mod generators;
pub mod harness;



#[cfg(test)]
mod agent_tests;




#[cfg(test)]
mod property_tests;

pub use generators::*;
pub use harness::*;
