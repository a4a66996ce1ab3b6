//! toolhub - remote tool invocation over a session-scoped push channel.
//!
//! An orchestrator calls tools that run on a client machine. Calls are
//! published to the client's session over a WebSocket hub and the broker
//! matches each reply back to the waiting caller by correlation id.

pub mod api;
pub mod broker;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod envelope;
pub mod hub;
pub mod registry;
pub mod tools;
