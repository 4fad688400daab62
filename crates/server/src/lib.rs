//! HTTP surface of the Chaingate gateway: tenant-facing JSON-RPC routes and
//! the narrow admin API.

pub mod admin;
pub mod router;
