//! Runtime for a temperature/humidity sensor node.
//!
//! One cooperative loop ([`runtime::Runtime`]) interleaves the HTTP control
//! surface, sensor sampling and the MQTT publisher on a single execution
//! context. Config changes arrive over HTTP, are persisted by the
//! [`store::ConfigStore`] and take effect through a restart.

pub mod errors;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod network;
pub mod rest;
pub mod runtime;
pub mod sampler;
pub mod sensor;
pub mod server;
pub mod state;
pub mod store;
pub mod validate;
