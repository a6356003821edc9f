//! 分级限流中间件
//!
//! 基于路由等级和客户端地址的分布式限流

pub mod classifier;
pub mod limiter;
#[cfg(test)]
pub mod memory_store;
pub mod middleware;
pub mod types;

pub use classifier::RouteClassifier;
pub use limiter::TieredRateLimiter;
pub use middleware::{RateLimitMiddleware, rate_limit_middleware};
pub use types::{Tier, TierPolicies};
