//! Fraud aggregator service
//!
//! HTTP surface and configuration of the aggregator. The binary in
//! `main.rs` wires these together with the outbound gateway clients.

pub mod api;
pub mod config;
pub mod error;
