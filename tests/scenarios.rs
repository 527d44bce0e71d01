//! Integration tests for the six concrete scenarios and the universal
//! invariants not already covered by per-module unit tests (spec §8).

use async_trait::async_trait;
use proxy_core::canonical::{AckMessageRequest, NackMessageRequest, ReceiveMessageRequest};
use proxy_core::consumer::ConsumerEngine;
use proxy_core::error::ProxyError;
use proxy_core::forward::{ClientFactory, ClientRole, ForwardClientPool};
use proxy_core::model::{BrokerData, Perm, QueueData, TopicRoute};
use proxy_core::producer::ProducerEngine;
use proxy_core::remoting::*;
use proxy_core::route_cache::{RouteResolver, TopicRouteCache};
use proxy_core::transport::BrokerTransport;
use proxy_core::tx_heartbeat::{TxHeartbeatConfig, TxHeartbeatService, HEARTBEAT_CLIENT_ID};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn single_broker_route(broker_name: &str, cluster: &str) -> TopicRoute {
    TopicRoute {
        queue_datas: vec![QueueData {
            broker_name: broker_name.to_string(),
            read_queue_nums: 4,
            write_queue_nums: 4,
            perm: Perm::READ_WRITE,
        }],
        broker_datas: vec![BrokerData {
            cluster: cluster.to_string(),
            broker_name: broker_name.to_string(),
            broker_addrs: HashMap::from([(0, "10.0.0.1:10911".to_string())]),
        }],
    }
}

struct FixedResolver(TopicRoute);

#[async_trait]
impl RouteResolver for FixedResolver {
    async fn resolve(&self, _topic: &str) -> Result<TopicRoute, ProxyError> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
struct RecordedCall {
    acks: Vec<AckMessageRequestHeader>,
    send_backs: Vec<ConsumerSendMsgBackRequestHeader>,
    heartbeats: Vec<HeartbeatData>,
}

/// Captures every call the engines issue, so scenarios can assert on
/// exact broker-facing traffic rather than just the returned Result.
struct RecordingTransport {
    record: Arc<Mutex<RecordedCall>>,
    pop_reply: Mutex<Option<(PopMessageResponseHeader, Vec<MessageBody>)>>,
}

#[async_trait]
impl BrokerTransport for RecordingTransport {
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
        Ok(self.pop_reply.lock().unwrap().take().unwrap())
    }

    async fn ack_async(
        &self,
        _addr: &str,
        header: AckMessageRequestHeader,
        _timeout: Duration,
    ) -> Result<AckStatus, ProxyError> {
        self.record.lock().unwrap().acks.push(header);
        Ok(AckStatus::Ok)
    }

    async fn change_invisible_time_async(
        &self,
        _addr: &str,
        header: ChangeInvisibleTimeRequestHeader,
        _timeout: Duration,
    ) -> Result<ChangeInvisibleTimeResponseHeader, ProxyError> {
        Ok(ChangeInvisibleTimeResponseHeader {
            extra_info: header.extra_info,
        })
    }

    async fn send_msg_back_async(
        &self,
        _addr: &str,
        header: ConsumerSendMsgBackRequestHeader,
        _timeout: Duration,
    ) -> Result<(), ProxyError> {
        self.record.lock().unwrap().send_backs.push(header);
        Ok(())
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
        data: HeartbeatData,
        _timeout: Duration,
    ) -> Result<(), ProxyError> {
        self.record.lock().unwrap().heartbeats.push(data);
        Ok(())
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

struct SingleTransportFactory {
    transport: Arc<RecordingTransport>,
}

#[async_trait]
impl ClientFactory for SingleTransportFactory {
    async fn create(
        &self,
        _role: ClientRole,
        _instance_name: &str,
    ) -> Result<Arc<dyn BrokerTransport>, ProxyError> {
        Ok(self.transport.clone())
    }
}

fn engines(
    route: TopicRoute,
    transport: Arc<RecordingTransport>,
) -> (Arc<ConsumerEngine>, Arc<ProducerEngine>) {
    let resolver = Arc::new(FixedResolver(route));
    let route_cache = Arc::new(TopicRouteCache::new(resolver, Duration::from_secs(30), Duration::from_secs(5)));
    let forward = Arc::new(ForwardClientPool::new(Arc::new(SingleTransportFactory { transport })));
    forward.start_all();
    let producer = Arc::new(ProducerEngine::new(forward.clone(), route_cache.clone()));
    let consumer = Arc::new(ConsumerEngine::new(forward, route_cache, producer.clone()));
    (consumer, producer)
}

/// Scenario 4: receive then ack round-trip.
#[tokio::test]
async fn receive_then_ack_round_trip() {
    let record = Arc::new(Mutex::new(RecordedCall::default()));
    let transport = Arc::new(RecordingTransport {
        record: record.clone(),
        pop_reply: Mutex::new(Some((
            PopMessageResponseHeader {
                status: PopStatus::Found,
                pop_time: 1_700_000_000_000,
                invisible_time: 30_000,
                revive_qid: 0,
                rest_num: 0,
                start_offset_info: "0 42,1 42,2 42,3 42".to_string(),
                msg_offset_info: "0 42,1 42,2 42,3 42".to_string(),
                order_count_info: None,
            },
            vec![MessageBody::default()],
        ))),
    });
    let (consumer, _producer) = engines(single_broker_route("b", "DefaultCluster"), transport);

    let result = consumer
        .receive(
            ReceiveMessageRequest {
                group: "g1".to_string(),
                topic: "t".to_string(),
                max_messages: 1,
                invisible_duration: Duration::from_secs(30),
                poll_timeout: Duration::from_secs(5),
                init_mode: 0,
                subscription_expression: String::new(),
                fifo: false,
                call_deadline: Duration::from_secs(10),
            },
            Duration::from_millis(100),
        )
        .await
        .unwrap();

    assert_eq!(result.messages.len(), 1);
    let handle = result.messages[0].receipt_handle.clone();
    let decoded = proxy_core::receipt::ReceiptHandle::decode(&handle).unwrap();
    assert_eq!(decoded.start_offset, 42);
    assert_eq!(decoded.queue_offset, Some(42));

    consumer
        .ack(AckMessageRequest {
            topic: "t".to_string(),
            consumer_group: "g1".to_string(),
            receipt_handle: handle.clone(),
            timeout: Duration::from_secs(3),
        })
        .await
        .unwrap();

    let recorded = record.lock().unwrap();
    assert_eq!(recorded.acks.len(), 1);
    assert_eq!(recorded.acks[0].extra_info, handle);
    assert_eq!(recorded.acks[0].queue_id, decoded.queue_id);
}

/// Scenario 5: nack past max attempts triggers exactly one send-back then
/// one ack for the same handle.
#[tokio::test]
async fn nack_past_max_attempts_sends_to_dlq_then_acks() {
    let record = Arc::new(Mutex::new(RecordedCall::default()));
    let transport = Arc::new(RecordingTransport {
        record: record.clone(),
        pop_reply: Mutex::new(None),
    });
    let (consumer, _producer) = engines(single_broker_route("b", "DefaultCluster"), transport);

    let handle = proxy_core::receipt::ReceiptHandle {
        start_offset: 0,
        pop_time: 0,
        invisible_time: 30_000,
        revive_qid: 0,
        topic: "t".to_string(),
        broker_name: "b".to_string(),
        queue_id: 3,
        queue_offset: Some(42),
    }
    .encode();

    consumer
        .nack(NackMessageRequest {
            topic: "t".to_string(),
            consumer_group: "g1".to_string(),
            receipt_handle: handle.clone(),
            delivery_attempt: 3,
            max_delivery_attempts: 3,
            timeout: Duration::from_secs(3),
        })
        .await
        .unwrap();

    let recorded = record.lock().unwrap();
    assert_eq!(recorded.send_backs.len(), 1);
    assert_eq!(recorded.acks.len(), 1);
    assert_eq!(recorded.acks[0].extra_info, handle);
}

/// Scenario 6: tx-heartbeat batching emits per-cluster payloads that
/// partition the cluster's producer groups by the configured batch size.
#[tokio::test]
async fn tx_heartbeat_batches_groups_per_cluster() {
    let record = Arc::new(Mutex::new(RecordedCall::default()));
    let transport = Arc::new(RecordingTransport {
        record: record.clone(),
        pop_reply: Mutex::new(None),
    });
    let resolver = Arc::new(FixedResolver(single_broker_route("b1", "c1")));
    let route_cache = Arc::new(TopicRouteCache::new(resolver, Duration::from_secs(30), Duration::from_secs(5)));
    let forward = Arc::new(ForwardClientPool::new(Arc::new(SingleTransportFactory { transport })));
    forward.start_all();

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

    for group in ["g1", "g2", "g3"] {
        service.add_producer_group(group, "t").await.unwrap();
    }

    service.tick().await;

    let recorded = record.lock().unwrap();
    assert_eq!(recorded.heartbeats.len(), 2);
    let mut group_sets: Vec<Vec<String>> = recorded.heartbeats.iter().map(|h| h.producer_data_set.clone()).collect();
    group_sets.sort_by_key(|g| g.len());
    assert_eq!(group_sets[0].len(), 1);
    assert_eq!(group_sets[1].len(), 2);
    for h in recorded.heartbeats.iter() {
        assert_eq!(h.client_id, HEARTBEAT_CLIENT_ID);
    }
}

/// Universal invariant: N concurrent getMessageQueue(t) with a cold
/// cache issue exactly 1 upstream request.
#[tokio::test]
async fn cold_cache_singleflight_one_upstream_call() {
    struct CountingResolver(AtomicU32);

    #[async_trait]
    impl RouteResolver for CountingResolver {
        async fn resolve(&self, _topic: &str) -> Result<TopicRoute, ProxyError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(single_broker_route("b", "c1"))
        }
    }

    let resolver = Arc::new(CountingResolver(AtomicU32::new(0)));
    let cache = Arc::new(TopicRouteCache::new(resolver.clone(), Duration::from_secs(30), Duration::from_secs(5)));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move { cache.get_message_queue("t").await.unwrap() }));
    }
    for h in handles {
        h.await.unwrap();
    }

    assert_eq!(resolver.0.load(Ordering::SeqCst), 1);
}
