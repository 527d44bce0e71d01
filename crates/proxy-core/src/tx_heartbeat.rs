//! Per-cluster batched producer-group transaction heartbeat loop (spec
//! §4.6).
//!
//! Keeps every broker hosting a prepared (half) transactional message
//! aware of the producer group that produced it, so the broker knows
//! whom to ask for resolution on timeout. The outer map is a single
//! reader during a scan; writers only add/remove whole entries, so a
//! `remove` mid-scan is observed atomically and never yields a partial
//! payload for that group.

use crate::error::ProxyError;
use crate::forward::{ClientRole, ForwardClientPool};
use crate::model::BrokerData;
use crate::remoting::HeartbeatData;
use crate::route_cache::TopicRouteCache;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// The client id this proxy advertises on every heartbeat it issues on a
/// producer's behalf.
pub const HEARTBEAT_CLIENT_ID: &str = "rmq-proxy-producer-client";

/// Decrements the shared queued-task count when a dispatch task finishes,
/// win or lose — including on panic unwind.
struct QueuedGuard(Arc<AtomicUsize>);

impl Drop for QueuedGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct TxHeartbeatConfig {
    pub period: Duration,
    pub batch_num: usize,
    pub thread_pool_nums: usize,
    pub thread_pool_queue_capacity: usize,
}

/// `group -> set<cluster>` maintained under concurrent update (spec's
/// entity "ProducerGroupClusterSet").
pub struct TxHeartbeatService {
    forward: Arc<ForwardClientPool>,
    route_cache: Arc<TopicRouteCache>,
    groups: DashMap<String, HashSet<String>>,
    /// `cluster -> (brokerName -> masterAddr)`, learned incidentally from
    /// every route resolved via `add_producer_group` — the proxy has no
    /// standalone cluster index of its own.
    cluster_brokers: DashMap<String, std::collections::HashMap<String, String>>,
    config: TxHeartbeatConfig,
    dispatch_permits: Semaphore,
    /// Dispatch tasks currently running or waiting on a permit. Bounds the
    /// executor's queue the way a `ThreadPoolExecutor` with a fixed-size
    /// `BlockingQueue` does: once full, a broker's batch for this tick is
    /// dropped rather than piling up unboundedly behind a slow broker.
    queued: Arc<AtomicUsize>,
}

impl TxHeartbeatService {
    pub fn new(forward: Arc<ForwardClientPool>, route_cache: Arc<TopicRouteCache>, config: TxHeartbeatConfig) -> Self {
        let permits = config.thread_pool_nums.max(1);
        Self {
            forward,
            route_cache,
            groups: DashMap::new(),
            cluster_brokers: DashMap::new(),
            config,
            dispatch_permits: Semaphore::new(permits),
            queued: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Resolves `topic`'s broker clusters through the route cache and
    /// adds them to `group`'s cluster set.
    pub async fn add_producer_group(&self, group: &str, topic: &str) -> Result<(), ProxyError> {
        let route = self.route_cache.get_message_queue(topic).await?;
        let clusters: HashSet<String> = route.broker_datas.iter().map(|b| b.cluster.clone()).collect();

        for broker in &route.broker_datas {
            if let Some(addr) = broker.master_addr() {
                self.cluster_brokers
                    .entry(broker.cluster.clone())
                    .or_default()
                    .insert(broker.broker_name.clone(), addr.to_string());
            }
        }

        self.groups
            .entry(group.to_string())
            .and_modify(|existing| existing.extend(clusters.iter().cloned()))
            .or_insert(clusters);
        Ok(())
    }

    /// Explicit teardown: drops the whole entry for `group`.
    pub fn remove_producer_group(&self, group: &str) {
        self.groups.remove(group);
    }

    /// Runs the periodic heartbeat loop until `shutdown` fires. Intended
    /// to be spawned once by `proxy-server` via
    /// [`crate::shutdown::ShutdownAwareTaskSpawner`].
    pub async fn run(&self, mut shutdown: crate::shutdown::ShutdownToken) {
        let mut ticker = tokio::time::interval(self.config.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = shutdown.cancelled() => {
                    tracing::info!("tx heartbeat loop shutting down");
                    break;
                }
            }
        }
    }

    /// One scan of the group map: builds per-cluster batched payloads and
    /// dispatches each to every broker address in that cluster through a
    /// bounded worker pool. Per-broker failures are logged, not
    /// propagated — they never block other brokers. Exposed publicly so
    /// operators (and tests) can force an out-of-band heartbeat tick
    /// without waiting for the periodic loop.
    pub async fn tick(&self) {
        let mut by_cluster: std::collections::HashMap<String, Vec<String>> = std::collections::HashMap::new();
        for entry in self.groups.iter() {
            let group = entry.key().clone();
            for cluster in entry.value() {
                by_cluster.entry(cluster.clone()).or_default().push(group.clone());
            }
        }

        for (cluster, groups) in by_cluster {
            let brokers = self.broker_addrs_for_cluster(&cluster);
            for batch in groups.chunks(self.config.batch_num) {
                let payload = HeartbeatData {
                    client_id: HEARTBEAT_CLIENT_ID.to_string(),
                    producer_data_set: batch.to_vec(),
                    consumer_data_set: Vec::new(),
                };
                self.dispatch(&brokers, payload).await;
            }
        }
    }

    fn broker_addrs_for_cluster(&self, cluster: &str) -> Vec<(String, String)> {
        self.cluster_brokers
            .get(cluster)
            .map(|m| m.iter().map(|(name, addr)| (name.clone(), addr.clone())).collect())
            .unwrap_or_default()
    }

    async fn dispatch(&self, brokers: &[(String, String)], payload: HeartbeatData) {
        let mut handles = Vec::new();
        for (broker_name, addr) in brokers.iter().cloned() {
            if self.queued.load(Ordering::Acquire) >= self.config.thread_pool_queue_capacity {
                tracing::warn!(broker = %broker_name, "heartbeat dispatch queue full, dropping this tick for broker");
                continue;
            }
            self.queued.fetch_add(1, Ordering::AcqRel);

            let permit = match self.dispatch_permits.acquire().await {
                Ok(p) => p,
                Err(_) => {
                    self.queued.fetch_sub(1, Ordering::AcqRel);
                    continue;
                }
            };
            let forward = self.forward.clone();
            let payload = payload.clone();
            let queued = self.queued.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let _queued_guard = QueuedGuard(queued);
                let client = match forward.get(ClientRole::TransactionProducer, &broker_name).await {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(broker = %broker_name, error = %e, "heartbeat dispatch: no client");
                        return;
                    }
                };
                if let Err(e) = client.heartbeat_async(&addr, payload, Duration::from_secs(3)).await {
                    tracing::warn!(broker = %broker_name, error = %e, "heartbeat dispatch failed");
                }
            }));
        }
        for h in handles {
            let _ = h.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Perm, QueueData, TopicRoute};
    use crate::route_cache::RouteResolver;
    use std::collections::HashMap;

    struct FixedResolver(TopicRoute);

    #[async_trait::async_trait]
    impl RouteResolver for FixedResolver {
        async fn resolve(&self, _topic: &str) -> Result<TopicRoute, ProxyError> {
            Ok(self.0.clone())
        }
    }

    fn route() -> TopicRoute {
        TopicRoute {
            queue_datas: vec![QueueData {
                broker_name: "b1".into(),
                read_queue_nums: 4,
                write_queue_nums: 4,
                perm: Perm::READ_WRITE,
            }],
            broker_datas: vec![BrokerData {
                cluster: "c1".into(),
                broker_name: "b1".into(),
                broker_addrs: HashMap::from([(0, "10.0.0.1:10911".into())]),
            }],
        }
    }

    #[tokio::test]
    async fn add_producer_group_tracks_clusters() {
        let resolver = Arc::new(FixedResolver(route()));
        let route_cache = Arc::new(TopicRouteCache::new(resolver, Duration::from_secs(30), Duration::from_secs(5)));
        let forward = Arc::new(ForwardClientPool::new(Arc::new(NoOpFactory)));
        let service = TxHeartbeatService::new(
            forward,
            route_cache,
            TxHeartbeatConfig {
                period: Duration::from_secs(30),
                batch_num: 2,
                thread_pool_nums: 4,
                thread_pool_queue_capacity: 10_000,
            },
        );

        service.add_producer_group("g1", "orders").await.unwrap();
        assert!(service.groups.get("g1").unwrap().contains("c1"));

        service.remove_producer_group("g1");
        assert!(service.groups.get("g1").is_none());
    }

    struct NoOpFactory;

    #[async_trait::async_trait]
    impl crate::forward::ClientFactory for NoOpFactory {
        async fn create(
            &self,
            _role: ClientRole,
            _instance_name: &str,
        ) -> Result<Arc<dyn crate::transport::BrokerTransport>, ProxyError> {
            Err(ProxyError::broker_unavailable("no-op"))
        }
    }
}
