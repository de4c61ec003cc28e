use serde::{de::DeserializeOwned, Serialize};

use super::error::StoreError;

// ============================================================================
// Payload Serializer
// ============================================================================
//
// Encodes domain events, envelope metadata and snapshot state into the text
// payloads the persistence store keeps. Injected into the event store and the
// snapshot repository at construction; there is no process-wide instance.
//
// ============================================================================

pub trait Serializer: Clone + Send + Sync + 'static {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, StoreError>;

    fn deserialize<T: DeserializeOwned>(&self, payload: &str) -> Result<T, StoreError>;
}

/// JSON payloads via serde_json
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, StoreError> {
        Ok(serde_json::to_string(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, payload: &str) -> Result<T, StoreError> {
        Ok(serde_json::from_str(payload)?)
    }
}
