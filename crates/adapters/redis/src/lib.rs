//! civic-adapter-redis - Redis 适配器

mod connection;
mod counter;

pub use connection::*;
pub use counter::*;
