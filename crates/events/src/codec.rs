//! JSON wire codec.
//!
//! Every body is a JSON object. Timestamps inside messages use
//! [`finshared_core::timestamp`] so consumers can decode the exact instant.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ChannelError;

/// Serialize a message into a JSON object body.
pub fn encode<M>(message: &M) -> Result<Vec<u8>, ChannelError>
where
    M: Serialize + ?Sized,
{
    let value = serde_json::to_value(message)
        .map_err(|e| ChannelError::Serialization(e.to_string()))?;

    if !value.is_object() {
        return Err(ChannelError::Serialization(format!(
            "message body must be a JSON object, got {}",
            json_kind(&value)
        )));
    }

    serde_json::to_vec(&value).map_err(|e| ChannelError::Serialization(e.to_string()))
}

/// Decode a JSON body into a typed message.
pub fn decode<M>(body: &[u8]) -> Result<M, ChannelError>
where
    M: DeserializeOwned,
{
    serde_json::from_slice(body).map_err(|e| ChannelError::Deserialization(e.to_string()))
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn rejects_non_object_bodies() {
        let err = encode(&vec![1, 2, 3]).unwrap_err();
        assert_eq!(
            err,
            ChannelError::Serialization("message body must be a JSON object, got an array".into())
        );
    }

    #[test]
    fn rejects_values_without_json_form() {
        // JSON object keys must be strings.
        let mut weird: HashMap<(i32, i32), &str> = HashMap::new();
        weird.insert((1, 2), "x");
        let mut outer = HashMap::new();
        outer.insert("payload", weird);

        assert!(matches!(encode(&outer), Err(ChannelError::Serialization(_))));
    }

    #[test]
    fn garbage_is_a_deserialization_error() {
        let err = decode::<serde_json::Value>(b"{not json").unwrap_err();
        assert!(matches!(err, ChannelError::Deserialization(_)));
    }
}
