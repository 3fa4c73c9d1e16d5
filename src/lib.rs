//! Magpie Backend Library
//!
//! Brokers chat between end users, a stateful agent host, and a metered
//! LLM gateway, persisting history and usage along the way.

pub mod agent;
pub mod api;
pub mod auth;
pub mod db;
pub mod directory;
pub mod gateway;
pub mod history;
pub mod relay;
