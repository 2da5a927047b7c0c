use anyhow::{Context, Result};
use prost_types::Any;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type DecodeFn = dyn Fn(&[u8]) -> Result<Value> + Send + Sync;

/// Per-type-url message decoders. Messages without a registered decoder are
/// still published, with raw bytes only.
#[derive(Clone, Default)]
pub struct MessageDecoders {
    decoders: HashMap<String, Arc<DecodeFn>>,
}

impl fmt::Debug for MessageDecoders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.decoders.keys().collect();
        types.sort();
        f.debug_struct("MessageDecoders")
            .field("types", &types)
            .finish()
    }
}

impl MessageDecoders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, type_url: impl Into<String>, decoder: F)
    where
        F: Fn(&[u8]) -> Result<Value> + Send + Sync + 'static,
    {
        self.decoders.insert(type_url.into(), Arc::new(decoder));
    }

    pub fn with<F>(mut self, type_url: impl Into<String>, decoder: F) -> Self
    where
        F: Fn(&[u8]) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(type_url, decoder);
        self
    }

    pub fn contains(&self, type_url: &str) -> bool {
        self.decoders.contains_key(type_url)
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// `Ok(None)` when no decoder is registered. A registered decoder that
    /// fails is an error for the whole height.
    pub fn decode(&self, message: &Any) -> Result<Option<Value>> {
        let Some(decoder) = self.decoders.get(&message.type_url) else {
            return Ok(None);
        };
        decoder(&message.value)
            .map(Some)
            .with_context(|| format!("failed to decode message {}", message.type_url))
    }
}
