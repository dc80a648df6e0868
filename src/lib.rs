//! `tdns-core`: iterative resolver, authoritative responder, DNSSEC
//! validator and unified DNS transport layer.
//!
//! This crate is the shared engine behind the `tdns` server family; it
//! owns no process lifecycle of its own (no daemonization, no signal
//! handling) -- that belongs to a binary built on top, such as
//! `tdns-cli`.

pub mod authoritative;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod log;
pub mod metrics;
pub mod names;
pub mod registry;
pub mod resolver;
pub mod transport;
pub mod validator;
pub mod zonedata;

pub use config::CoreConfig;
pub use error::CoreError;
