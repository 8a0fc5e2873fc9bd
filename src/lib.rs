// Kitsune media edge library
//
// Origin resolution, multi-origin fetch with transformation failover, and a
// versioned chunk-aware cache over a rate-limited key-value store.

pub mod background;
pub mod cache;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod failover;
pub mod fetcher;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod origin;
pub mod pipeline;
pub mod range;
pub mod reload;
pub mod retry;
pub mod router;
pub mod s3;
pub mod transform;
