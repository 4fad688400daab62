//! # Chaingate Core
//!
//! Core library for the Chaingate multi-tenant blockchain RPC gateway.
//!
//! The crate splits into a data plane and a control plane sharing one record
//! store:
//!
//! - **[`proxy`]**: the JSON-RPC request pipeline: route-rule resolution,
//!   paid/free/MEV upstream selection, fan-out with retry classification,
//!   large-response streaming and structured trace emission.
//!
//! - **[`grpc`]**: the transparent gRPC proxy: access-key auth, chain
//!   routing from metadata, round-robin HTTP/2 channel pools with hot-swap
//!   refresh, and the standard health service.
//!
//! - **[`checker`]**: the health-check engine: five probe strategies behind
//!   a lazily built factory, a per-tick probe response cache, monotone block
//!   height tracking, and the orchestrator that promotes surviving URL sets.
//!
//! - **[`registry`]**: reconciliation of published endpoint sets against the
//!   store (candidates and the ready projection).
//!
//! - **[`store`]**: the narrow contract the core issues against the external
//!   collections backend, with the in-memory implementation used by the
//!   server binary, plus the after-save event stream.
//!
//! - **[`hooks`]** / **[`push`]**: control-plane reactions to store events
//!   and the mirror client for an external push sink.
//!
//! ```text
//!               ┌──────────────┐   ready_upstream   ┌──────────────┐
//!  client ────► │  ProxyEngine │ ◄───────────────── │ CheckEngine  │
//!  (jsonrpc)    └──────┬───────┘                    └──────┬───────┘
//!               ┌──────┴───────┐                    ┌──────┴───────┐
//!  client ────► │  GrpcProxy   │ ◄──── store ─────► │  Registry    │
//!  (grpc)       └──────────────┘     (+ events)     └──────────────┘
//! ```

pub mod checker;
pub mod config;
pub mod grpc;
pub mod hooks;
pub mod keys;
pub mod proxy;
pub mod push;
pub mod registry;
pub mod store;
pub mod types;
