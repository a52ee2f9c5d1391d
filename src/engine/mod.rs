pub mod locks;
pub mod merge;
pub mod orchestrator;
pub mod rate_limit;
pub mod stats;

pub use locks::TokenLocks;
pub use orchestrator::{encode_state, ensure_finite, AggregationEngine};
pub use rate_limit::FetchRateLimiter;
pub use stats::EngineStatsSnapshot;
