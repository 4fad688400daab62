//! Reusable mock upstream infrastructure for integration tests.

pub mod grpc_mock;
pub mod rpc_mock;
