//! Impls - ports の実装
//!
//! - **InMemoryStore**: single-process store (tests, demos)
//! - **RedisStore**: shared durable store
//! - **HttpDispatcher**: reqwest-based outbound calls

pub mod http;
pub mod inmem_store;
pub mod redis_store;

pub use self::http::HttpDispatcher;
pub use self::inmem_store::InMemoryStore;
pub use self::redis_store::RedisStore;
