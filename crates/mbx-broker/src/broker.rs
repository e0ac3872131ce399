use std::sync::Arc;

use tracing::info;

use mbx_fs::FileSystem;
use mbx_wire::Request;

use crate::config::BrokerConfig;
use crate::dispatcher::{Dispatcher, Session};
use crate::error::{BrokerError, BrokerResult};
use crate::registry::BoxRegistry;
use crate::transport::SessionEndpoint;

/// An MBX broker instance: a backing volume, a box registry, and a
/// running session dispatcher.
///
/// The broker owns all of its shared state; nothing is ambient or static.
pub struct Broker {
    registry: Arc<BoxRegistry>,
    dispatcher: Dispatcher,
}

impl Broker {
    /// Bring up the backing volume and the worker pool. Must be called
    /// within a tokio runtime.
    pub fn start(config: BrokerConfig) -> BrokerResult<Self> {
        if config.worker_count == 0 || config.queue_depth == 0 || config.chunk_len == 0 {
            return Err(BrokerError::InvalidConfig(
                "worker_count, queue_depth and chunk_len must be positive".into(),
            ));
        }

        let fs = Arc::new(FileSystem::new(config.fs)?);
        let registry = Arc::new(BoxRegistry::new(fs, config.max_boxes));
        let dispatcher = Dispatcher::spawn(Arc::clone(&registry), &config);

        info!(max_boxes = config.max_boxes, "broker started");
        Ok(Self {
            registry,
            dispatcher,
        })
    }

    /// The box registry (and, through it, the backing volume).
    pub fn registry(&self) -> &Arc<BoxRegistry> {
        &self.registry
    }

    /// Hand a decoded registration request and its transport endpoint to
    /// the dispatcher. Blocks while the session queue is full.
    pub async fn submit(
        &self,
        request: Request,
        endpoint: Box<dyn SessionEndpoint>,
    ) -> BrokerResult<()> {
        self.dispatcher.submit(Session { request, endpoint }).await
    }

    /// Stop accepting sessions, serve what is already queued, and wait
    /// for the workers to exit.
    pub async fn shutdown(self) {
        self.dispatcher.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_and_shutdown() {
        let broker = Broker::start(BrokerConfig::default()).unwrap();
        assert!(broker.registry().list().is_empty());
        broker.shutdown().await;
    }

    #[tokio::test]
    async fn zero_worker_config_rejected() {
        let config = BrokerConfig {
            worker_count: 0,
            ..Default::default()
        };
        assert!(matches!(
            Broker::start(config),
            Err(BrokerError::InvalidConfig(_))
        ));
    }
}
