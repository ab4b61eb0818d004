//! Common types and utilities for the icnd forwarder.
//!
//! This crate provides the vocabulary shared by the forwarding engine and
//! the command line tools: ICN names, the packet variants, face ids,
//! errors and metrics.

pub mod error;
pub mod metrics;
pub mod name;
pub mod packet;
pub mod types;

/// Reexport of common types
pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
