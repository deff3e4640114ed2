//! Core library for the `weather` service.
//!
//! This crate defines:
//! - A dual-tier (fresh + last-known-good) result cache
//! - A per-upstream circuit breaker
//! - Abstraction over weather providers and their two implementations
//! - The fallback chain that answers each lookup
//! - Configuration & credentials handling
//!
//! It is used by `weather-cli`, but can also be reused by other binaries or services.

pub mod breaker;
pub mod cache;
pub mod config;
pub mod error;
pub mod lookup;
pub mod model;
pub mod provider;

pub use breaker::CircuitBreaker;
pub use cache::DualTierCache;
pub use config::{Config, ProviderConfig, UpstreamConfig};
pub use error::{BreakerError, FetchError};
pub use lookup::{UpstreamClient, UpstreamHealth, WeatherLookup};
pub use model::{LookupOutcome, Reading, Upstream, WeatherPayload};
pub use provider::{ProviderId, WeatherProvider};
