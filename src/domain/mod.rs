//! Domain types and the ports the application layer depends on.

pub mod health;
pub mod money;
pub mod ports;
pub mod provider;
pub mod session;
pub mod transaction;
pub mod workflow;
