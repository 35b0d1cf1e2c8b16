//! Webhook Router - routes spooled webhooks through a rule-based directive language.
//!
//! Rules match headers and JSON payload fields of a webhook and act on it:
//! forward it over HTTP, rewrite it, log it, or fan it out to other queues.
//! Webhooks wait in a crash-safe filesystem spool until a queue's rules
//! consume them.

pub mod context;
pub mod driver;
pub mod filter;
pub mod runtime;
pub mod spool;
pub mod types;
pub mod webhook;

#[cfg(test)]
mod test_utils;
