//! Shared wiring handed to every component that serves client traffic.

use crate::auth::{SharedSecretValidator, TokenValidator};
use crate::broker::MessageBroker;
use crate::config::Config;
use crate::error::BrokerError;
use crate::relay::BrokerRelay;
use crate::router::Router;
use crate::scheduler::registry::SchedulerRegistry;
use crate::transport::RoomTransport;
use std::sync::Arc;

pub struct AppContext {
    pub config: Config,
    pub broker: Arc<MessageBroker>,
    pub auth: Arc<dyn TokenValidator>,
    pub registry: Arc<SchedulerRegistry>,
    pub relay: Arc<BrokerRelay>,
    pub router: Router,
    pub transport: Arc<dyn RoomTransport>,
}

impl AppContext {
    /// Builds the full wiring from a configuration and a transport.
    pub fn build(
        config: Config,
        transport: Arc<dyn RoomTransport>,
    ) -> Result<Arc<Self>, BrokerError> {
        let broker = Arc::new(MessageBroker::from_config(&config)?);
        let auth: Arc<dyn TokenValidator> = Arc::new(SharedSecretValidator::new(
            config.app.operator_token.clone(),
        ));
        let registry = SchedulerRegistry::new(broker.clone(), config.clone());
        let relay = BrokerRelay::new(broker.clone(), transport.clone());
        let router = Router::with_default_routes();

        Ok(Arc::new(AppContext {
            config,
            broker,
            auth,
            registry,
            relay,
            router,
            transport,
        }))
    }

    /// Drains the runtime in dependency order: relays first, then the
    /// schedulers, then the broker itself.
    pub async fn shutdown(&self) {
        self.relay.stop_all().await;
        self.registry.shutdown().await;
        self.broker.shutdown().await;
    }
}
