use crate::core::{RemotingError, Result};
use log::warn;
use std::collections::HashMap;
use std::sync::Arc;

/// Body encoding selected by a command's `protocol` field.
///
/// The remoting core only needs to put human-readable status text into
/// synthesized replies; structured payloads are the business layer's concern.
pub trait ProtocolFactory: Send + Sync {
    /// Protocol identifier carried on the wire
    fn id(&self) -> u8;

    /// Name for diagnostics
    fn name(&self) -> &str;

    /// Encode a status/error text into a body
    fn encode(&self, text: &str) -> Vec<u8>;

    /// Decode a body produced by [`encode`](Self::encode)
    fn decode(&self, body: &[u8]) -> Result<String>;
}

/// Chooses the [`ProtocolFactory`] for a protocol id.
pub trait ProtocolFactorySelector: Send + Sync {
    fn select(&self, protocol: u8) -> Arc<dyn ProtocolFactory>;
}

/// Raw UTF-8 bodies.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextProtocol;

impl TextProtocol {
    pub const ID: u8 = 0;
}

impl ProtocolFactory for TextProtocol {
    fn id(&self) -> u8 {
        Self::ID
    }

    fn name(&self) -> &str {
        "text"
    }

    fn encode(&self, text: &str) -> Vec<u8> {
        text.as_bytes().to_vec()
    }

    fn decode(&self, body: &[u8]) -> Result<String> {
        String::from_utf8(body.to_vec()).map_err(|e| RemotingError::Codec(e.to_string()))
    }
}

/// Bodies holding a single JSON string.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonProtocol;

impl JsonProtocol {
    pub const ID: u8 = 1;
}

impl ProtocolFactory for JsonProtocol {
    fn id(&self) -> u8 {
        Self::ID
    }

    fn name(&self) -> &str {
        "json"
    }

    fn encode(&self, text: &str) -> Vec<u8> {
        match serde_json::to_vec(text) {
            Ok(body) => body,
            Err(e) => {
                warn!("json encode of status text failed, sending raw text: {}", e);
                text.as_bytes().to_vec()
            }
        }
    }

    fn decode(&self, body: &[u8]) -> Result<String> {
        serde_json::from_slice(body).map_err(|e| RemotingError::Codec(e.to_string()))
    }
}

/// Bodies holding a single MessagePack string.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgPackProtocol;

impl MsgPackProtocol {
    pub const ID: u8 = 2;
}

impl ProtocolFactory for MsgPackProtocol {
    fn id(&self) -> u8 {
        Self::ID
    }

    fn name(&self) -> &str {
        "msgpack"
    }

    fn encode(&self, text: &str) -> Vec<u8> {
        match rmp_serde::to_vec(text) {
            Ok(body) => body,
            Err(e) => {
                warn!("msgpack encode of status text failed, sending raw text: {}", e);
                text.as_bytes().to_vec()
            }
        }
    }

    fn decode(&self, body: &[u8]) -> Result<String> {
        rmp_serde::from_slice(body).map_err(|e| RemotingError::Codec(e.to_string()))
    }
}

/// Id-keyed set of protocol factories with a fallback for unknown ids.
pub struct ProtocolRegistry {
    factories: HashMap<u8, Arc<dyn ProtocolFactory>>,
    fallback: Arc<dyn ProtocolFactory>,
}

impl ProtocolRegistry {
    /// Empty registry falling back to [`TextProtocol`]
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            fallback: Arc::new(TextProtocol),
        }
    }

    /// Registry with the text, JSON and MessagePack factories
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TextProtocol));
        registry.register(Arc::new(JsonProtocol));
        registry.register(Arc::new(MsgPackProtocol));
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn ProtocolFactory>) {
        self.factories.insert(factory.id(), factory);
    }

    pub fn fallback(mut self, factory: Arc<dyn ProtocolFactory>) -> Self {
        self.fallback = factory;
        self
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ProtocolFactorySelector for ProtocolRegistry {
    fn select(&self, protocol: u8) -> Arc<dyn ProtocolFactory> {
        match self.factories.get(&protocol) {
            Some(factory) => Arc::clone(factory),
            None => Arc::clone(&self.fallback),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_known_protocols() {
        let registry = ProtocolRegistry::with_defaults();
        assert_eq!(registry.select(TextProtocol::ID).name(), "text");
        assert_eq!(registry.select(JsonProtocol::ID).name(), "json");
        assert_eq!(registry.select(MsgPackProtocol::ID).name(), "msgpack");
    }

    #[test]
    fn test_unknown_protocol_falls_back_to_text() {
        let registry = ProtocolRegistry::with_defaults();
        let factory = registry.select(200);
        assert_eq!(factory.id(), TextProtocol::ID);
    }

    #[test]
    fn test_status_text_survives_each_protocol() {
        let registry = ProtocolRegistry::with_defaults();
        for id in [TextProtocol::ID, JsonProtocol::ID, MsgPackProtocol::ID] {
            let factory = registry.select(id);
            let body = factory.encode("system busy");
            assert_eq!(factory.decode(&body).unwrap(), "system busy");
        }
    }

    #[test]
    fn test_json_body_is_quoted() {
        let body = JsonProtocol.encode("hi");
        assert_eq!(body, b"\"hi\"");
    }

    #[test]
    fn test_text_decode_rejects_invalid_utf8() {
        assert!(TextProtocol.decode(&[0xff, 0xfe]).is_err());
    }
}
