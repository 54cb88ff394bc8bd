//! Infrastructure bus transports.
//!
//! The bus abstraction and the in-memory bus live in `content-events`; this
//! module provides broker-backed transports.

#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "redis")]
pub use redis_streams::{
    RedisErrorQueue, RedisRedeliveryScheduler, RedisStreamsError, RedisStreamsEventBus, redelivery_key,
};
