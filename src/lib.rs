// Core domain types and identifier validation
pub mod core;
pub mod error;

// Configuration and logging
pub mod config;
pub mod telemetry;

// Storage collaborators
pub mod store;

// Live data providers and fallback chains
pub mod providers;

// Freshness policy and derived metrics
pub mod freshness;
pub mod metrics;

// Aggregation control flow
pub mod engine;

// Realtime distribution (server side) and the consuming client
pub mod transport;
pub mod realtime;
pub mod client;

// Re-export commonly used types for convenience
pub use crate::core::*;
pub use client::TokenDataClient;
pub use engine::AggregationEngine;
pub use error::{EngineError, ErrorClass, ProviderError, StoreError};
pub use realtime::RealtimeHub;
