//! Audit Engine - conversational lead-qualification service.

pub mod api;
pub mod audit;
pub mod cache;
pub mod config;
pub mod error;
pub mod identity;
pub mod llm;
pub mod notify;
pub mod resilience;
pub mod threads;
