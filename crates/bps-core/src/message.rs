use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single pub/sub message: the envelope shared by every backend.
///
/// `id` is a hint for partitioning or deduplication and `attributes` carry
/// out-of-band labels; backends without support for either ignore them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Opaque payload. Serialized as a base64 string.
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

impl Message {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

impl From<&str> for Message {
    fn from(data: &str) -> Self {
        Message::new(data.as_bytes())
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Message::new(data)
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        match encoded {
            Some(s) => STANDARD.decode(s).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let msg = Message::new("payload")
            .with_id("key-1")
            .with_attribute("source", "test");
        assert_eq!(msg.data(), b"payload");
        assert_eq!(msg.id.as_deref(), Some("key-1"));
        assert_eq!(msg.attribute("source"), Some("test"));
        assert_eq!(msg.attribute("missing"), None);
    }

    #[test]
    fn test_data_is_base64_on_the_wire() {
        let json = serde_json::to_string(&Message::from("hello")).unwrap();
        assert_eq!(json, r#"{"data":"aGVsbG8="}"#);
    }

    #[test]
    fn test_empty_fields_are_omitted() {
        let json = serde_json::to_string(&Message::default()).unwrap();
        assert_eq!(json, "{}");
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Message::default());
    }

    #[test]
    fn test_decode_full_record() {
        let json = r#"{"id":"m1","data":"djE=","attributes":{"k":"v"}}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id.as_deref(), Some("m1"));
        assert_eq!(msg.data(), b"v1");
        assert_eq!(msg.attribute("k"), Some("v"));
    }

    #[test]
    fn test_decode_null_data() {
        let msg: Message = serde_json::from_str(r#"{"data":null}"#).unwrap();
        assert!(msg.data.is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        assert!(serde_json::from_str::<Message>(r#"{"data":"!!"}"#).is_err());
    }
}
