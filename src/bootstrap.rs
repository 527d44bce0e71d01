//! Wires `proxy-core`'s layered components from [`ProxyConfig`] (spec
//! §9's explicit construction order): transport seam -> forward pool ->
//! route cache -> selectors -> engines -> relay/heartbeat services.
//! Built once in `main`, then handed to the gRPC activities behind an
//! `Arc` -- there is no DI container or macro layer here.

use crate::seams;
use proxy_core::config::ProxyConfig;
use proxy_core::consumer::ConsumerEngine;
use proxy_core::error::ProxyError;
use proxy_core::forward::ForwardClientPool;
use proxy_core::producer::ProducerEngine;
use proxy_core::relay::RelayChannel;
use proxy_core::route_cache::TopicRouteCache;
use proxy_core::select::{AssignmentSelector, WriteQueueSelector};
use proxy_core::transport::EndpointConverter;
use proxy_core::tx_heartbeat::{TxHeartbeatConfig, TxHeartbeatService};
use std::sync::Arc;
use std::time::Duration;

/// Negative route-cache TTL. Not configurable through `ProxyConfig`
/// (spec §6 names only the positive TTL); kept short so a topic that
/// starts existing after a `NOT_FOUND` is seen again quickly.
const ROUTE_CACHE_NEGATIVE_TTL: Duration = Duration::from_secs(5);

/// Every shared, long-lived component the gRPC activities dispatch
/// into. One instance lives for the process lifetime, held behind an
/// `Arc` by both protocol revisions' service implementations.
pub struct ProxyState {
    pub config: ProxyConfig,
    pub forward: Arc<ForwardClientPool>,
    pub route_cache: Arc<TopicRouteCache>,
    pub write_selector: WriteQueueSelector,
    pub assignment_selector: AssignmentSelector,
    pub producer: Arc<ProducerEngine>,
    pub consumer: Arc<ConsumerEngine>,
    pub tx_heartbeat: Arc<TxHeartbeatService>,
    pub relay: Arc<RelayChannel>,
    pub converter: Box<dyn EndpointConverter>,
}

impl ProxyState {
    pub fn build(config: ProxyConfig) -> Result<Arc<Self>, ProxyError> {
        let resolver = Arc::new(seams::NameServiceRouteResolver::new(config.namesrv_addr.clone()));
        let factory = Arc::new(seams::ModeClientFactory::new(config.proxy_mode));
        let forward = Arc::new(ForwardClientPool::new(factory));
        forward.start_all();

        let route_cache = Arc::new(TopicRouteCache::new(
            resolver,
            Duration::from_millis(config.route_cache_ttl_millis as u64),
            ROUTE_CACHE_NEGATIVE_TTL,
        ));

        let producer = Arc::new(ProducerEngine::new(forward.clone(), route_cache.clone()));
        let consumer = Arc::new(ConsumerEngine::new(forward.clone(), route_cache.clone(), producer.clone()));

        let tx_heartbeat = Arc::new(TxHeartbeatService::new(
            forward.clone(),
            route_cache.clone(),
            TxHeartbeatConfig {
                period: Duration::from_secs(config.transaction_heartbeat_period_second as u64),
                batch_num: config.transaction_heartbeat_batch_num as usize,
                thread_pool_nums: config.transaction_heartbeat_thread_pool_nums as usize,
                thread_pool_queue_capacity: config.transaction_heartbeat_thread_pool_queue_capacity as usize,
            },
        ));

        let relay = Arc::new(RelayChannel::new(
            Duration::from_secs(config.grpc_proxy_relay_request_timeout_in_seconds as u64),
            Duration::from_secs(config.grpc_client_channel_expire_seconds as u64),
        ));

        let converter = seams::converter_for_mode(config.proxy_mode);

        Ok(Arc::new(Self {
            config,
            forward,
            route_cache,
            write_selector: WriteQueueSelector::new(),
            assignment_selector: AssignmentSelector::new(),
            producer,
            consumer,
            tx_heartbeat,
            relay,
            converter,
        }))
    }

    pub fn long_polling_reserve(&self) -> Duration {
        Duration::from_millis(self.config.long_polling_reserve_time_in_millis as u64)
    }

    pub fn max_delivery_attempts(&self) -> u32 {
        self.config.max_delivery_attempts
    }
}
