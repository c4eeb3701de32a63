//! Model adapters used to reach the external reasoning service.
//!
//! Each module exposes an implementation for a specific provider while sharing
//! the trait-based interface defined in [`traits`]. Requests can ask for
//! schema-constrained JSON output, which is how the oracle gateway pins the
//! response shape.

#![warn(missing_docs, clippy::pedantic)]

pub mod ollama;
pub mod openai;
pub mod traits;

mod http_client;
