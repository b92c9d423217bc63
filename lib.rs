#![warn(rust_2018_idioms)]

//! A bidirectional RPC channel: one persistent byte stream carries many
//! concurrent outbound calls (matched to their responses by correlation id)
//! while inbound requests are dispatched to locally registered services.

pub mod channel;
pub mod codec;
pub mod error;
pub mod pending;
pub mod service;
pub mod transport;
pub mod wire;

pub use channel::{MethodDescriptor, RpcChannel};
pub use error::CallError;
pub use service::ServiceRegistry;
