//! Arbor Allocator - the authoritative ledger of agent resources
//!
//! The allocator owns, for every registered agent, the partition of the
//! agent's total resources into *available* (unoffered), *offered*
//! (embedded in outstanding offers), and *used* (granted to running tasks).
//! It is the single writer of that partition: the master's reservation
//! coordinator, the offer lifecycle, and task completion all mutate it
//! through the operations exposed here, never by reaching into a
//! `ResourceSet` directly.
//!
//! Each agent's ledger sits behind its own async mutex, so operations
//! against one agent queue in arrival order while different agents proceed
//! fully in parallel. Newly computed offers are pushed through the
//! [`OfferSink`] callback after the ledger has moved the resources to
//! *offered*, so a framework never observes an offer the ledger does not
//! back.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod allocator;
pub mod ledger;

pub use allocator::{Allocator, AllocatorError, OfferSink, Result};
pub use ledger::{AgentLedger, AgentPartition, ResourceOperation};
