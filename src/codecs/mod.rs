//! Cache Codec Implementations
//!
//! This module provides built-in implementations of the [`CacheCodec`](crate::traits::CacheCodec) trait.
//! Values stored by the read-through cache pass through a codec on the way in
//! and out of the backend.

mod json;
pub use json::JsonCodec;
