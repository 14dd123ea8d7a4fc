//! Pluggable value serialization.
//!
//! Collections store opaque bytes; a [`Codec`] turns caller values into
//! those bytes and back. MessagePack is the default, JSON is available for
//! roots that should stay human-inspectable.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Value serializer used by a collection.
pub trait Codec: Send + Sync + 'static {
    /// Serialize a value into record payload bytes.
    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>>;

    /// Deserialize record payload bytes into a value.
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T>;
}

/// MessagePack encoding via `rmp-serde` (struct fields by name).
#[derive(Clone, Copy, Debug, Default)]
pub struct MessagePack;

impl Codec for MessagePack {
    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// JSON encoding via `serde_json`.
#[derive(Clone, Copy, Debug, Default)]
pub struct Json;

impl Codec for Json {
    fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Contact {
        name: String,
        phone: Option<String>,
    }

    #[test]
    fn test_messagepack_struct() {
        let contact = Contact {
            name: "John Doe".into(),
            phone: Some("555-1234".into()),
        };
        let bytes = MessagePack::encode(&contact).unwrap();
        let back: Contact = MessagePack::decode(&bytes).unwrap();
        assert_eq!(back, contact);
    }

    #[test]
    fn test_json_is_readable() {
        let bytes = Json::encode("foo").unwrap();
        assert_eq!(bytes, b"\"foo\"");
    }

    #[test]
    fn test_decode_wrong_type() {
        let bytes = Json::encode("not a number").unwrap();
        let result: Result<u32> = Json::decode(&bytes);
        assert!(matches!(result, Err(StoreError::Deserialization(_))));

        let bytes = MessagePack::encode("not a number").unwrap();
        let result: Result<u32> = MessagePack::decode(&bytes);
        assert!(matches!(result, Err(StoreError::Deserialization(_))));
    }
}
