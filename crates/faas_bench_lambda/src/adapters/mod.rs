//! Provider integration: AWS session, function connection, artifact storage,
//! and the HTTP invoker used to reach deployed gateways.

pub mod aws_connection;
pub mod connection;
pub mod invoke;
pub mod object_store;
pub mod session;
