//! Built-in pure connectors.
//!
//! These have no external dependencies and exist mostly for wiring and
//! testing pipelines end to end: `generate` emits a fixed payload a fixed
//! number of times, `drop` discards everything it is given.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::connector::{noop_ack_fn, AckFn, Input, Output};
use crate::registry::ConnectorRegistry;
use streamforge_types::{MessageBatch, MessagePart, TransportError};

/// Register the built-in connectors.
pub fn register(registry: &mut ConnectorRegistry) {
    registry.register_input(
        "generate",
        Box::new(|config| {
            let config: GenerateConfig = serde_json::from_value(config.clone())
                .map_err(|e| TransportError::connector(format!("invalid generate config: {e}")))?;
            Ok(Box::new(GenerateInput::new(config)) as Box<dyn Input>)
        }),
    );
    registry.register_output(
        "drop",
        Box::new(|_config| Ok(Box::new(DropOutput::default()) as Box<dyn Output>)),
    );
}

/// Config for the `generate` input.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateConfig {
    /// Payload of every emitted message.
    pub mapping: String,
    /// How many messages to emit before reporting end of input.
    #[serde(default = "default_count")]
    pub count: usize,
    /// Optional delay between messages, in milliseconds.
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

fn default_count() -> usize {
    1
}

/// Input emitting a fixed payload `count` times, then `EndOfInput`.
pub struct GenerateInput {
    config: GenerateConfig,
    emitted: usize,
}

impl GenerateInput {
    /// Create a generator from its config.
    #[must_use]
    pub fn new(config: GenerateConfig) -> Self {
        Self { config, emitted: 0 }
    }
}

#[async_trait]
impl Input for GenerateInput {
    async fn connect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn read(&mut self) -> Result<(MessageBatch, AckFn), TransportError> {
        if self.emitted >= self.config.count {
            return Err(TransportError::EndOfInput);
        }
        if let Some(ms) = self.config.interval_ms {
            if self.emitted > 0 {
                tokio::time::sleep(Duration::from_millis(ms)).await;
            }
        }
        self.emitted += 1;
        let part = MessagePart::from(self.config.mapping.as_str());
        Ok((MessageBatch::single(part), noop_ack_fn()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Output that logs and discards every batch, acking success.
#[derive(Debug, Default)]
pub struct DropOutput;

#[async_trait]
impl Output for DropOutput {
    async fn connect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn write(&mut self, batch: &MessageBatch) -> Result<(), TransportError> {
        tracing::debug!(parts = batch.len(), "Dropping batch");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
