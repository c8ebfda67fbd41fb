//! Schema resolution and message decoding.
//!
//! Channel schemas arrive as `(encoding, name, bytes)` tuples. The registry
//! resolves a message encoding to a decoder factory; a channel whose
//! encoding cannot be resolved, or whose schema fails to parse, is marked
//! unsupported and degrades only that topic.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};

use super::transport::ChannelInfo;

/// Decodes wire payloads for one channel into dynamic values.
pub trait MessageDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> anyhow::Result<serde_json::Value>;
}

/// Builds a decoder from an advertised channel's schema.
pub trait DecoderFactory: Send + Sync {
    fn parse_schema(&self, channel: &ChannelInfo) -> anyhow::Result<Box<dyn MessageDecoder>>;
}

/// Maps message encodings to decoder factories.
#[derive(Clone)]
pub struct DecoderRegistry {
    factories: HashMap<String, Arc<dyn DecoderFactory>>,
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        let mut registry = DecoderRegistry { factories: HashMap::new() };
        registry.register("json", JsonDecoderFactory);
        registry
    }
}

impl DecoderRegistry {
    /// Registry with no built-in encodings.
    pub fn empty() -> Self {
        DecoderRegistry { factories: HashMap::new() }
    }

    /// Register a factory for a message encoding, replacing any existing
    /// registration.
    pub fn register(&mut self, encoding: impl Into<String>, factory: impl DecoderFactory + 'static) {
        self.factories.insert(encoding.into(), Arc::new(factory));
    }

    /// Resolve a channel to a decoder.
    pub fn parse_channel(&self, channel: &ChannelInfo) -> anyhow::Result<Box<dyn MessageDecoder>> {
        let factory = self
            .factories
            .get(&channel.encoding)
            .ok_or_else(|| anyhow!("unsupported message encoding '{}'", channel.encoding))?;
        factory
            .parse_schema(channel)
            .with_context(|| format!("failed to parse schema '{}'", channel.schema_name))
    }

    /// Whether any registered factory handles `encoding`.
    pub fn supports(&self, encoding: &str) -> bool {
        self.factories.contains_key(encoding)
    }
}

/// Built-in decoder for JSON-encoded channels.
struct JsonDecoderFactory;

struct JsonDecoder;

impl DecoderFactory for JsonDecoderFactory {
    fn parse_schema(&self, channel: &ChannelInfo) -> anyhow::Result<Box<dyn MessageDecoder>> {
        if !channel.schema_encoding.is_empty() && channel.schema_encoding != "jsonschema" {
            bail!(
                "unsupported schema encoding '{}' for json channel",
                channel.schema_encoding
            );
        }
        // An empty schema is allowed (schemaless JSON); a non-empty one must
        // at least be a valid JSON document.
        if !channel.schema.is_empty() {
            serde_json::from_slice::<serde_json::Value>(&channel.schema)
                .context("schema is not valid JSON")?;
        }
        Ok(Box::new(JsonDecoder))
    }
}

impl MessageDecoder for JsonDecoder {
    fn decode(&self, payload: &[u8]) -> anyhow::Result<serde_json::Value> {
        serde_json::from_slice(payload).context("payload is not valid JSON")
    }
}
