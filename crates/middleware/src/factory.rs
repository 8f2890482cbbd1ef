use std::sync::Arc;

use tracing::{info, warn};
use trade_producer_metadata::{Environment, TransportType};

use crate::error::TransportError;
use crate::memory::InMemoryTransport;
use crate::nats::{NatsTransport, SubjectBuilder};
use crate::transport::Transport;

/// Error creating middleware
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("configuration error: {0}")]
    ConfigError(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Factory for creating middleware instances based on environment config
pub struct MiddlewareFactory;

impl MiddlewareFactory {
    /// Create a transport based on environment configuration.
    ///
    /// NATS with `jetstream: true` ensures the stream `{TOPIC}` over
    /// `{topic}.>` exists and switches the transport to acked publishes.
    pub async fn create_transport(env: &Environment) -> Result<Arc<dyn Transport>, FactoryError> {
        match env.transport.transport_type {
            TransportType::Memory => {
                warn!("Using in-memory transport - trades are not persisted");
                Ok(Arc::new(InMemoryTransport::new()))
            }
            TransportType::Nats => {
                let url = env.transport.url.as_deref().ok_or_else(|| {
                    FactoryError::ConfigError("transport.url is required for nats".to_string())
                })?;
                let transport = NatsTransport::connect(url).await?;

                if !env.transport.jetstream {
                    info!(url = %url, "NATS transport ready (core publish)");
                    return Ok(Arc::new(transport));
                }

                let subjects = SubjectBuilder::new(env.transport.topic.as_str());
                transport
                    .ensure_stream(subjects.stream_name(), vec![subjects.all().to_string()])
                    .await?;
                info!(url = %url, stream = %subjects.stream_name(), "NATS transport ready (JetStream acks)");
                Ok(Arc::new(transport.with_jetstream_acks()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_memory_transport() {
        let mut env = Environment::default();
        env.transport.transport_type = TransportType::Memory;
        let transport = MiddlewareFactory::create_transport(&env).await.unwrap();
        drop(transport);
    }

    #[tokio::test]
    async fn test_nats_requires_url() {
        let mut env = Environment::default();
        env.transport.url = None;

        let result = MiddlewareFactory::create_transport(&env).await;
        assert!(matches!(result, Err(FactoryError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_nats_connect_failure_is_reported() {
        let mut env = Environment::default();
        env.transport.url = Some("nats://127.0.0.1:1".to_string());

        let result = MiddlewareFactory::create_transport(&env).await;
        assert!(matches!(
            result,
            Err(FactoryError::Transport(TransportError::ConnectionFailed(_)))
        ));
    }
}
