//! Lazily-created, pooled async broker clients, keyed by role and
//! instance name (spec §4.1).
//!
//! Four named roles — `default`, `producer`, `read-consumer`,
//! `write-consumer`, `transaction-producer` — each get their own pool
//! because the broker-side retry/timeout/thread-count policy differs per
//! role (a read consumer tolerates much longer pop long-polling waits).
//! Construction is singleflight per `(role, instanceName)`: concurrent
//! callers for the same key observe the exact same client.

use crate::error::ProxyError;
use crate::transport::BrokerTransport;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

/// The four roles named in spec §4.1, plus `Default` for unqualified use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientRole {
    Default,
    Producer,
    ReadConsumer,
    WriteConsumer,
    TransactionProducer,
}

/// Builds a fresh client for one `(role, instanceName)` key. Implemented
/// by the host binary, which knows how to construct a concrete
/// `BrokerTransport`-backed connection (dialing a broker address, setting
/// role-specific timeouts).
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create(
        &self,
        role: ClientRole,
        instance_name: &str,
    ) -> Result<Arc<dyn BrokerTransport>, ProxyError>;
}

struct Entry {
    cell: OnceCell<Arc<dyn BrokerTransport>>,
    creation_order: u64,
}

/// The forward-client pool described in spec §4.1.
pub struct ForwardClientPool {
    factory: Arc<dyn ClientFactory>,
    clients: DashMap<(ClientRole, String), Arc<Entry>>,
    creation_seq: AtomicU64,
    closed: AtomicBool,
    construct_lock: Mutex<()>,
}

impl ForwardClientPool {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            clients: DashMap::new(),
            creation_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            construct_lock: Mutex::new(()),
        }
    }

    /// Idempotent: marks the pool open. No eager connections are made;
    /// clients are still created lazily on first `get`.
    pub fn start_all(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Returns a started client for `(role, instanceName)`, creating it at
    /// most once. Fails with `Shutdown` if the pool has been shut down, or
    /// `BrokerUnavailable` if construction fails.
    pub async fn get(
        &self,
        role: ClientRole,
        instance_name: &str,
    ) -> Result<Arc<dyn BrokerTransport>, ProxyError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ProxyError::broker_unavailable("forward client pool is shut down"));
        }

        let key = (role, instance_name.to_string());
        // The mutex is held only across entry *insertion*, never across
        // the client construction itself (spec §5's "compute-if-absent
        // pattern with a mutex held only across client construction").
        let entry = {
            let _guard = self.construct_lock.lock().await;
            self.clients
                .entry(key)
                .or_insert_with(|| {
                    Arc::new(Entry {
                        cell: OnceCell::new(),
                        creation_order: self.creation_seq.fetch_add(1, Ordering::SeqCst),
                    })
                })
                .clone()
        };

        entry
            .cell
            .get_or_try_init(|| async { self.factory.create(role, instance_name).await })
            .await
            .map(Arc::clone)
    }

    /// Idempotent shutdown; marks the pool closed so future `get` calls
    /// fail, then drains already-created clients in reverse-creation
    /// order. Clients themselves own their own disconnect semantics —
    /// this pool only forgets them.
    pub async fn shutdown_all(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let mut entries: Vec<((ClientRole, String), Arc<Entry>)> = self
            .clients
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        entries.sort_by_key(|(_, e)| std::cmp::Reverse(e.creation_order));

        for (key, _) in entries {
            self.clients.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remoting::*;
    use std::time::Duration;

    struct FakeTransport;

    #[async_trait]
    impl BrokerTransport for FakeTransport {
        async fn send_async(
            &self,
            _addr: &str,
            _header: SendMessageRequestHeader,
            _body: MessageBody,
            _timeout: Duration,
        ) -> Result<SendMessageResponseHeader, ProxyError> {
            unimplemented!()
        }
        async fn pop_async(
            &self,
            _addr: &str,
            _header: PopMessageRequestHeader,
            _timeout: Duration,
        ) -> Result<(PopMessageResponseHeader, Vec<MessageBody>), ProxyError> {
            unimplemented!()
        }
        async fn ack_async(
            &self,
            _addr: &str,
            _header: AckMessageRequestHeader,
            _timeout: Duration,
        ) -> Result<AckStatus, ProxyError> {
            unimplemented!()
        }
        async fn change_invisible_time_async(
            &self,
            _addr: &str,
            _header: ChangeInvisibleTimeRequestHeader,
            _timeout: Duration,
        ) -> Result<ChangeInvisibleTimeResponseHeader, ProxyError> {
            unimplemented!()
        }
        async fn send_msg_back_async(
            &self,
            _addr: &str,
            _header: ConsumerSendMsgBackRequestHeader,
            _timeout: Duration,
        ) -> Result<(), ProxyError> {
            unimplemented!()
        }
        async fn end_transaction_async(
            &self,
            _addr: &str,
            _header: EndTransactionRequestHeader,
            _timeout: Duration,
        ) -> Result<(), ProxyError> {
            unimplemented!()
        }
        async fn heartbeat_async(
            &self,
            _addr: &str,
            _data: HeartbeatData,
            _timeout: Duration,
        ) -> Result<(), ProxyError> {
            unimplemented!()
        }
        async fn pull_async(
            &self,
            _addr: &str,
            _header: PullMessageRequestHeader,
            _timeout: Duration,
        ) -> Result<Vec<MessageBody>, ProxyError> {
            unimplemented!()
        }
        async fn search_offset_async(
            &self,
            _addr: &str,
            _header: SearchOffsetRequestHeader,
            _timeout: Duration,
        ) -> Result<i64, ProxyError> {
            unimplemented!()
        }
        async fn get_max_offset_async(
            &self,
            _addr: &str,
            _header: GetMaxOffsetRequestHeader,
            _timeout: Duration,
        ) -> Result<i64, ProxyError> {
            unimplemented!()
        }
    }

    struct CountingFactory {
        calls: AtomicU64,
    }

    #[async_trait]
    impl ClientFactory for CountingFactory {
        async fn create(
            &self,
            _role: ClientRole,
            _instance_name: &str,
        ) -> Result<Arc<dyn BrokerTransport>, ProxyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(FakeTransport))
        }
    }

    #[tokio::test]
    async fn concurrent_get_for_same_key_creates_once() {
        let factory = Arc::new(CountingFactory {
            calls: AtomicU64::new(0),
        });
        let pool = Arc::new(ForwardClientPool::new(factory.clone()));
        pool.start_all();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.get(ClientRole::Producer, "broker-a").await.unwrap()
            }));
        }
        let clients: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(factory.calls.load(Ordering::SeqCst), 1);
        for client in &clients {
            assert!(Arc::ptr_eq(client, &clients[0]));
        }
    }

    #[tokio::test]
    async fn get_fails_after_shutdown() {
        let factory = Arc::new(CountingFactory {
            calls: AtomicU64::new(0),
        });
        let pool = ForwardClientPool::new(factory);
        pool.start_all();
        pool.get(ClientRole::Default, "broker-a").await.unwrap();
        pool.shutdown_all().await;
        assert!(pool.get(ClientRole::Default, "broker-b").await.is_err());
    }
}
