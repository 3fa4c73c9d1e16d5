//! Client for the metered LLM gateway.
//!
//! The gateway fronts model providers and meters spend per user credential.
//! Chat traffic goes through [`GatewayClient::completion`] /
//! [`GatewayClient::completion_stream`] with the caller's credential;
//! provisioning calls use the master key.

mod client;
mod error;

pub use client::{GatewayClient, GatewayClientConfig, RetryPolicy};
pub use error::{GatewayError, GatewayResult};
