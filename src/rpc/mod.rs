//! The control surface: a stateless translation
//! from external JSON-RPC commands to core operations.

pub mod client;
pub mod methods;
pub mod server;
pub mod types;

pub use client::RpcClient;
pub use methods::RpcContext;
pub use server::RpcServer;
