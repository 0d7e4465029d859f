//! Application layer: resilient invocation, provider selection, the workflow
//! engine and the gateway facade tying them together.

pub mod gateway;
pub mod health;
pub mod invoker;
pub mod orchestrator;
pub mod registry;
pub mod steps;
pub mod workflow;
