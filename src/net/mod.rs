//! Outbound network plumbing.
//!
//! Every provider call passes through the same three layers: a per-provider
//! token bucket, the anonymity router that owns the shared HTTP client, and
//! the `ProviderClient` boundary that turns transport failures into
//! classified errors.

pub mod provider;
pub mod rate_limiter;
pub mod router;

pub use provider::{ProviderClient, ProviderError, ProviderRequest, ProviderResponse};
pub use rate_limiter::{BucketConfig, RateLimiter};
pub use router::{AnonymityRouter, Transport};
