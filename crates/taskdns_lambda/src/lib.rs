//! AWS-oriented adapters and handlers for public-IP DNS assignment.
//!
//! This crate owns runtime integration details (Lambda handlers, the
//! records-table, ENI-lookup, and DNS adapters) and exposes a single
//! runtime module boundary for the record, codec, and event primitives
//! owned by `crates/taskdns_core`.

pub mod adapters;
pub mod handlers;
pub mod runtime;
