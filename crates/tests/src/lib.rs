//! Integration tests for the Chaingate gateway.
//!
//! Test modules:
//!
//! - `checker_e2e_tests`: strategy checkers and the check orchestrator
//!   probing live mock upstream nodes
//! - `proxy_e2e_tests`: the full JSON-RPC route (auth, selection, fan-out
//!   retry, response passthrough) against mock upstreams
//! - `grpc_proxy_tests`: the transparent gRPC proxy served over HTTP/2
//!   cleartext, including auth and end-to-end forwarding
//! - `mock_infrastructure`: reusable mock upstream servers
//!
//! Run with `cargo test --package tests`. No external services required;
//! every upstream is a local mock on an ephemeral port.

pub mod mock_infrastructure;

#[cfg(test)]
mod checker_e2e_tests;
#[cfg(test)]
mod grpc_proxy_tests;
#[cfg(test)]
mod proxy_e2e_tests;
