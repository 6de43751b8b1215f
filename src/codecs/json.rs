//! JSON Codec using `serde_json`

use crate::error::{CacheError, Result};
use crate::traits::CacheCodec;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// JSON Codec using `serde_json`
///
/// Default codec for read-models; JSON keeps cached entries readable when
/// inspected directly in Redis.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl CacheCodec for JsonCodec {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CacheError::codec(self.name(), e))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::codec(self.name(), e))
    }

    fn name(&self) -> &'static str {
        "serde_json"
    }
}
