//! Built-in [`AuthHandler`](crate::protocol::AuthHandler) implementations.

pub mod dummy;
pub mod ipaddr;
