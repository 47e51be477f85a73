//! Decoder configuration.

use std::sync::Arc;

use tracing::warn;

use crate::control::{ControlSink, NoopControl};
use crate::decompress::DecompressorFactory;
use crate::fec::{no_fec_factory, FecFactory};

/// What to do when the display is busy at frame submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DropPolicy {
    /// Drop the frame (count it as dropped).
    #[default]
    NonBlocking,
    /// Wait for the display.
    Blocking,
}

impl DropPolicy {
    /// Parse the `drop-policy` parameter value.
    pub fn from_param(value: &str) -> Option<DropPolicy> {
        match value {
            "nonblock" => Some(DropPolicy::NonBlocking),
            "blocking" => Some(DropPolicy::Blocking),
            _ => None,
        }
    }
}

/// Configuration for one [`crate::VideoDecoder`].
#[derive(Clone)]
pub struct DecoderConfig {
    pub drop_policy: DropPolicy,
    /// Key material for per-packet decryption. `None` expects plaintext.
    pub encryption: Option<Vec<u8>>,
    pub control: Arc<dyn ControlSink>,
    pub fec_factory: FecFactory,
    pub decompress_factories: Vec<Arc<dyn DecompressorFactory>>,
    /// Extra bytes appended to tile assembly buffers (codec-library input
    /// padding; zero if unused).
    pub padding: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            drop_policy: DropPolicy::default(),
            encryption: None,
            control: Arc::new(NoopControl),
            fec_factory: no_fec_factory(),
            decompress_factories: Vec::new(),
            padding: 0,
        }
    }
}

impl DecoderConfig {
    pub fn builder() -> DecoderConfigBuilder {
        DecoderConfigBuilder::default()
    }
}

#[derive(Clone, Default)]
pub struct DecoderConfigBuilder {
    config: DecoderConfig,
}

impl DecoderConfigBuilder {
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.config.drop_policy = policy;
        self
    }

    /// Set the drop policy from its textual parameter form; unknown values
    /// keep the default and log a warning.
    pub fn drop_policy_param(mut self, value: &str) -> Self {
        match DropPolicy::from_param(value) {
            Some(policy) => self.config.drop_policy = policy,
            None => warn!("Wrong drop policy {value}!"),
        }
        self
    }

    pub fn encryption(mut self, key_material: impl Into<Vec<u8>>) -> Self {
        self.config.encryption = Some(key_material.into());
        self
    }

    pub fn control(mut self, control: Arc<dyn ControlSink>) -> Self {
        self.config.control = control;
        self
    }

    pub fn fec_factory(mut self, factory: FecFactory) -> Self {
        self.config.fec_factory = factory;
        self
    }

    pub fn decompress_factory(mut self, factory: Arc<dyn DecompressorFactory>) -> Self {
        self.config.decompress_factories.push(factory);
        self
    }

    pub fn padding(mut self, padding: usize) -> Self {
        self.config.padding = padding;
        self
    }

    pub fn build(self) -> DecoderConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_policy_param() {
        assert_eq!(
            DropPolicy::from_param("nonblock"),
            Some(DropPolicy::NonBlocking)
        );
        assert_eq!(
            DropPolicy::from_param("blocking"),
            Some(DropPolicy::Blocking)
        );
        assert_eq!(DropPolicy::from_param("whatever"), None);
    }

    #[test]
    fn test_builder_keeps_default_on_bad_param() {
        let config = DecoderConfig::builder().drop_policy_param("bogus").build();
        assert_eq!(config.drop_policy, DropPolicy::NonBlocking);
    }
}
