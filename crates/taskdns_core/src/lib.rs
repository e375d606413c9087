//! Shared public-IP DNS assignment domain primitives.
//!
//! This crate owns the record model, the persisted-item codec, and the
//! task state-change event contract. It intentionally excludes AWS SDK
//! and Lambda runtime concerns; those live in `crates/taskdns_lambda`.

pub mod attrs;
pub mod codec;
pub mod events;
pub mod record;
