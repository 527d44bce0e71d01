//! Proto <-> engine conversion helpers shared by the v1 and v2 gRPC
//! surfaces.
//!
//! Every handler here takes a `proxy_proto::v1` request type (v2 reuses
//! these shapes directly for everything except ack/nack's replacement)
//! and a `&ProxyState`, and returns a `Result<_, tonic::Status>` so the
//! per-version service impls can just forward into it. `ProxyError`
//! converts into `tonic::Status` via the `From` impl in `proxy_core::error`,
//! so `?` handles every engine failure without extra mapping.

pub mod v1;
pub mod v2;

use crate::bootstrap::ProxyState;
use proxy_core::canonical::{
    AckMessageRequest, EndTransactionRequest, NackMessageRequest, ReceiveMessageRequest,
    SendMessageRequest,
};
use proxy_core::error::ProxyError;
use proxy_core::model::{BrokerData, Perm, SelectableMessageQueue, TopicRoute, TransactionId};
use proxy_core::remoting::{
    GetMaxOffsetRequestHeader, MessageBody, PullMessageRequestHeader, SearchOffsetRequestHeader,
};
use proxy_core::select::gen_partitions;
use proxy_core::transport::EndpointConverter;
use proxy_proto::common;
use proxy_proto::v1;
use std::time::Duration;
use tonic::metadata::MetadataMap;
use tonic::Status;

/// RocketMQ's own reserved property names, carried in `user_properties` on
/// the wire rather than promoted to dedicated proto fields elsewhere.
pub(crate) const PROPERTY_TAGS: &str = "TAGS";
pub(crate) const PROPERTY_KEYS: &str = "KEYS";
pub(crate) const PROPERTY_UNIQ_CLIENT_MESSAGE_ID_KEY: &str = "UNIQ_KEY";

/// Applied to every broker RPC this layer issues directly (pull/offset
/// queries have no dedicated engine, so no per-call timeout is threaded
/// through a canonical request type for them).
pub(crate) const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(3);

pub(crate) fn ok_status() -> common::Status {
    common::Status {
        code: common::Code::Ok as i32,
        message: String::new(),
    }
}

fn client_input(msg: impl Into<String>) -> Status {
    Status::from(ProxyError::client_input(msg))
}

pub(crate) fn resource(name: impl Into<String>) -> common::Resource {
    common::Resource { name: name.into() }
}

fn require_topic(topic: Option<common::Resource>) -> Result<String, Status> {
    topic
        .map(|t| t.name)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| client_input("missing topic"))
}

pub(crate) fn perm_to_permission(perm: Perm) -> i32 {
    use common::Permission;
    let variant = match (perm.can_read(), perm.can_write()) {
        (true, true) => Permission::ReadWrite,
        (true, false) => Permission::Read,
        (false, true) => Permission::Write,
        (false, false) => Permission::PermissionNone,
    };
    variant as i32
}

/// Flattens a proto `Endpoints` into the `"host:port;host:port"` shape
/// `canonical::QueryRouteRequest.endpoints` expects. `None` if the field is
/// absent, empty, or every address is the zero value -- all three read as
/// "no endpoint was supplied" to the caller.
pub(crate) fn encode_client_endpoints(endpoints: &Option<common::Endpoints>) -> Option<String> {
    let addresses = &endpoints.as_ref()?.addresses;
    let rendered: Vec<String> = addresses
        .iter()
        .filter(|a| !a.host.is_empty() && a.port != 0)
        .map(|a| format!("{}:{}", a.host, a.port))
        .collect();
    if rendered.is_empty() {
        None
    } else {
        Some(rendered.join(";"))
    }
}

/// The advertised endpoint for a broker's master replica, run through the
/// active `EndpointConverter` so cluster deployments can rewrite it before
/// it reaches a client.
fn broker_endpoints(
    converter: &dyn EndpointConverter,
    broker: &BrokerData,
) -> Result<common::Endpoints, ProxyError> {
    let master = broker
        .master_addr()
        .ok_or_else(|| ProxyError::internal(format!("no master address for broker {}", broker.broker_name)))?;
    let advertised = converter.convert(master);
    let endpoint = proxy_core::address::Endpoint::parse(&advertised)?;
    Ok(common::Endpoints {
        addresses: vec![common::Address {
            host: endpoint.host,
            port: endpoint.port as i32,
        }],
    })
}

fn selectable_to_message_queue(
    topic: &str,
    route: &TopicRoute,
    converter: &dyn EndpointConverter,
    mq: &SelectableMessageQueue,
    perm: Perm,
) -> Result<common::MessageQueue, ProxyError> {
    let broker = route
        .broker(&mq.broker_name)
        .ok_or_else(|| ProxyError::internal(format!("broker {} missing from route for topic {topic}", mq.broker_name)))?;
    Ok(common::MessageQueue {
        topic: Some(resource(topic)),
        broker_name: mq.broker_name.clone(),
        broker_endpoints: Some(broker_endpoints(converter, broker)?),
        queue_id: mq.queue_id,
        permission: perm_to_permission(perm),
    })
}

/// Every synthesized partition of every queue in the route, for
/// `QueryRoute` responses.
fn route_to_message_queues(
    topic: &str,
    route: &TopicRoute,
    converter: &dyn EndpointConverter,
) -> Result<Vec<common::MessageQueue>, ProxyError> {
    let mut out = Vec::new();
    for queue in &route.queue_datas {
        let broker = route
            .broker(&queue.broker_name)
            .ok_or_else(|| ProxyError::internal(format!("broker {} missing from route for topic {topic}", queue.broker_name)))?;
        let endpoints = broker_endpoints(converter, broker)?;
        for partition in gen_partitions(queue) {
            out.push(common::MessageQueue {
                topic: Some(resource(topic)),
                broker_name: queue.broker_name.clone(),
                broker_endpoints: Some(endpoints.clone()),
                queue_id: partition.queue_id,
                permission: perm_to_permission(partition.perm),
            });
        }
    }
    Ok(out)
}

fn message_body_from_proto(msg: &common::Message) -> MessageBody {
    let mut properties = msg.user_properties.clone();
    if let Some(sys) = &msg.system_properties {
        if !sys.tag.is_empty() {
            properties.insert(PROPERTY_TAGS.to_string(), sys.tag.clone());
        }
        if !sys.keys.is_empty() {
            properties.insert(PROPERTY_KEYS.to_string(), sys.keys.clone());
        }
        if !sys.message_id.is_empty() {
            properties.insert(PROPERTY_UNIQ_CLIENT_MESSAGE_ID_KEY.to_string(), sys.message_id.clone());
        }
    }
    MessageBody {
        payload: msg.body.clone(),
        properties,
    }
}

fn proto_message_from_body(topic: &str, body: &MessageBody) -> common::Message {
    let mut user_properties = body.properties.clone();
    let tag = user_properties.remove(PROPERTY_TAGS).unwrap_or_default();
    let keys = user_properties.remove(PROPERTY_KEYS).unwrap_or_default();
    let message_id = user_properties
        .remove(PROPERTY_UNIQ_CLIENT_MESSAGE_ID_KEY)
        .unwrap_or_default();
    user_properties.remove(proxy_core::receipt::POP_CK_PROPERTY);

    common::Message {
        topic: Some(resource(topic)),
        body: body.payload.clone(),
        user_properties,
        system_properties: Some(common::SystemProperties {
            message_id,
            keys,
            tag,
            born_timestamp: 0,
            receipt_handle: String::new(),
            delivery_attempt: 0,
            invisible_duration_millis: 0,
            orphaned_transaction_recovery_duration: String::new(),
            transaction_resolution: common::TransactionResolution::TransactionResolutionUnspecified as i32,
        }),
    }
}

fn proto_message_from_received(topic: &str, received: &proxy_core::canonical::ReceivedMessage) -> common::Message {
    let mut msg = proto_message_from_body(topic, &received.body);
    if let Some(sys) = msg.system_properties.as_mut() {
        sys.receipt_handle = received.receipt_handle.clone();
        sys.delivery_attempt = received.reconsume_times;
    }
    msg
}

pub(crate) fn relay_command_to_poll_response(cmd: proxy_core::relay::RelayCommand) -> v1::PollCommandResponse {
    use proxy_core::remoting::BackRequestBody;
    use v1::poll_command_response::Command;

    let command = match cmd.body {
        BackRequestBody::CheckTransactionState {
            msg_id,
            transaction_id,
            ..
        } => Command::CheckTransactionState(v1::CheckTransactionStateCommand {
            message_id: msg_id,
            transaction_id: transaction_id.unwrap_or_default(),
        }),
        BackRequestBody::GetConsumerRunningInfo { consumer_group, client_id } => {
            Command::GetConsumerRunningInfo(v1::GetConsumerRunningInfoCommand {
                group: consumer_group,
                client_id,
            })
        }
        BackRequestBody::ConsumeMessageDirectly {
            consumer_group,
            client_id,
            msg_id,
        } => Command::ConsumeMessageDirectly(v1::ConsumeMessageDirectlyCommand {
            group: consumer_group,
            client_id,
            message_id: msg_id,
        }),
    };

    v1::PollCommandResponse {
        nonce: cmd.nonce.to_string(),
        command: Some(command),
    }
}

pub(crate) async fn query_route(state: &ProxyState, req: v1::QueryRouteRequest) -> Result<v1::QueryRouteResponse, Status> {
    let topic = require_topic(req.topic)?;
    if state.config.proxy_mode == proxy_core::config::ProxyMode::Cluster && encode_client_endpoints(&req.endpoints).is_none() {
        return Err(client_input("missing or default client endpoint in cluster mode"));
    }

    let route = state.route_cache.get_message_queue(&topic).await?;
    let message_queues = route_to_message_queues(&topic, &route, state.converter.as_ref())?;
    Ok(v1::QueryRouteResponse {
        status: Some(ok_status()),
        message_queues,
    })
}

pub(crate) async fn query_assignment(
    state: &ProxyState,
    req: v1::QueryAssignmentRequest,
) -> Result<v1::QueryAssignmentResponse, Status> {
    let topic = require_topic(req.topic)?;
    if state.config.proxy_mode == proxy_core::config::ProxyMode::Cluster && encode_client_endpoints(&req.endpoints).is_none() {
        return Err(client_input("missing or default client endpoint in cluster mode"));
    }

    let route = state.route_cache.get_message_queue(&topic).await?;
    let selected = state.assignment_selector.select(&topic, &route);
    let assignments = selected
        .iter()
        .map(|mq| selectable_to_message_queue(&topic, &route, state.converter.as_ref(), mq, Perm::READ))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(v1::QueryAssignmentResponse {
        status: Some(ok_status()),
        assignments,
    })
}

pub(crate) async fn send_message(state: &ProxyState, req: v1::SendMessageRequest) -> Result<v1::SendMessageResponse, Status> {
    let first = req
        .messages
        .first()
        .ok_or_else(|| client_input("SendMessage requires at least one message"))?;
    let topic = first
        .topic
        .as_ref()
        .map(|t| t.name.clone())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| client_input("missing topic"))?;

    let route = state.route_cache.get_message_queue(&topic).await?;
    let queue = state
        .write_selector
        .select(&topic, &req.producer_group, &route)
        .ok_or_else(|| ProxyError::no_writeable_queue(topic.clone()))?;

    let messages: Vec<_> = req.messages.iter().map(message_body_from_proto).collect();
    let properties = messages.first().map(|m| m.properties.clone()).unwrap_or_default();

    let result = state
        .producer
        .send(SendMessageRequest {
            queue,
            producer_group: req.producer_group.clone(),
            messages,
            properties,
            timeout: DEFAULT_RPC_TIMEOUT,
        })
        .await?;

    if result.transaction_id.is_some() {
        state.tx_heartbeat.add_producer_group(&req.producer_group, &topic).await?;
    }

    Ok(v1::SendMessageResponse {
        status: Some(ok_status()),
        message_ids: result.msg_ids,
        transaction_id: result.transaction_id.unwrap_or_default(),
    })
}

/// Parses the `grpc-timeout` header tonic attaches to every call that
/// carried a client-side deadline (wire spec: ASCII digits followed by one
/// of `H`/`M`/`S`/`m`/`u`/`n` for hours/minutes/seconds/milli/micro/nanos).
/// `None` means the client sent no deadline.
fn deadline_from_metadata(metadata: &MetadataMap) -> Option<Duration> {
    let raw = metadata.get("grpc-timeout")?.to_str().ok()?;
    let unit_pos = raw.find(|c: char| !c.is_ascii_digit())?;
    let (digits, unit) = raw.split_at(unit_pos);
    let value: u64 = digits.parse().ok()?;
    match unit {
        "H" => Some(Duration::from_secs(value * 3600)),
        "M" => Some(Duration::from_secs(value * 60)),
        "S" => Some(Duration::from_secs(value)),
        "m" => Some(Duration::from_millis(value)),
        "u" => Some(Duration::from_micros(value)),
        "n" => Some(Duration::from_nanos(value)),
        _ => None,
    }
}

pub(crate) async fn receive_message(
    state: &ProxyState,
    request: tonic::Request<v1::ReceiveMessageRequest>,
) -> Result<v1::ReceiveMessageResponse, Status> {
    let call_deadline = deadline_from_metadata(request.metadata());
    let req = request.into_inner();
    let topic = require_topic(req.topic)?;
    let poll_timeout = Duration::from_millis(req.poll_timeout_millis.max(0) as u64);

    let result = state
        .consumer
        .receive(
            ReceiveMessageRequest {
                group: req.group,
                topic: topic.clone(),
                max_messages: req.max_messages,
                invisible_duration: Duration::from_millis(req.invisible_duration_millis.max(0) as u64),
                poll_timeout,
                init_mode: req.init_mode,
                subscription_expression: req.filter_expression,
                fifo: req.fifo,
                call_deadline: call_deadline.unwrap_or(poll_timeout),
            },
            state.long_polling_reserve(),
        )
        .await?;

    let messages = result.messages.iter().map(|m| proto_message_from_received(&topic, m)).collect();
    Ok(v1::ReceiveMessageResponse {
        status: Some(ok_status()),
        messages,
    })
}

pub(crate) async fn ack_message(state: &ProxyState, req: v1::AckMessageRequest) -> Result<v1::AckMessageResponse, Status> {
    let topic = require_topic(req.topic)?;
    state
        .consumer
        .ack(AckMessageRequest {
            topic,
            consumer_group: req.group,
            receipt_handle: req.receipt_handle,
            timeout: DEFAULT_RPC_TIMEOUT,
        })
        .await?;
    Ok(v1::AckMessageResponse { status: Some(ok_status()) })
}

pub(crate) async fn nack_message(state: &ProxyState, req: v1::NackMessageRequest) -> Result<v1::NackMessageResponse, Status> {
    let topic = require_topic(req.topic)?;
    state
        .consumer
        .nack(NackMessageRequest {
            topic,
            consumer_group: req.group,
            receipt_handle: req.receipt_handle,
            delivery_attempt: req.delivery_attempt.max(0) as u32,
            max_delivery_attempts: req.max_delivery_attempts.max(0) as u32,
            timeout: DEFAULT_RPC_TIMEOUT,
        })
        .await?;
    Ok(v1::NackMessageResponse { status: Some(ok_status()) })
}

pub(crate) async fn heartbeat(_state: &ProxyState, _req: v1::HeartbeatRequest) -> Result<v1::HeartbeatResponse, Status> {
    // Liveness signal only; producer-group cluster registration for the
    // periodic broker-facing heartbeat happens from send_message once a
    // half-message's topic/cluster is known.
    Ok(v1::HeartbeatResponse { status: Some(ok_status()) })
}

pub(crate) async fn health_check(_state: &ProxyState, _req: v1::HealthCheckRequest) -> Result<v1::HealthCheckResponse, Status> {
    Ok(v1::HealthCheckResponse { status: Some(ok_status()) })
}

pub(crate) async fn notify_client_termination(
    state: &ProxyState,
    req: v1::NotifyClientTerminationRequest,
) -> Result<v1::NotifyClientTerminationResponse, Status> {
    state.tx_heartbeat.remove_producer_group(&req.group);
    Ok(v1::NotifyClientTerminationResponse { status: Some(ok_status()) })
}

pub(crate) async fn end_transaction(state: &ProxyState, req: v1::EndTransactionRequest) -> Result<v1::EndTransactionResponse, Status> {
    let topic = require_topic(req.topic)?;
    let decoded = TransactionId::decode(&req.transaction_id)?;

    state
        .producer
        .end_transaction(
            &decoded.broker_name,
            EndTransactionRequest {
                producer_group: req.producer_group,
                topic,
                msg_id: req.message_id,
                transaction_id: Some(decoded.broker_transaction_id),
                commit_log_offset: decoded.commit_log_offset,
                queue_offset: decoded.queue_offset,
                commit: req.resolution == common::TransactionResolution::Commit as i32,
                from_transaction_check: req.from_transaction_check,
            },
            DEFAULT_RPC_TIMEOUT,
        )
        .await?;

    Ok(v1::EndTransactionResponse { status: Some(ok_status()) })
}

pub(crate) async fn pull_message(state: &ProxyState, req: v1::PullMessageRequest) -> Result<v1::PullMessageResponse, Status> {
    let mq = req.message_queue.ok_or_else(|| client_input("missing message queue"))?;
    let topic = mq.topic.map(|t| t.name).unwrap_or_default();
    if topic.is_empty() {
        return Err(client_input("missing topic"));
    }

    let route = state.route_cache.get_message_queue(&topic).await?;
    let broker = route
        .broker(&mq.broker_name)
        .ok_or_else(|| ProxyError::internal(format!("broker {} missing from route", mq.broker_name)))?;
    let addr = broker
        .master_addr()
        .ok_or_else(|| ProxyError::broker_unavailable(format!("no master address for broker {}", mq.broker_name)))?;
    let client = state.forward.get(proxy_core::forward::ClientRole::ReadConsumer, &mq.broker_name).await?;

    let header = PullMessageRequestHeader {
        consumer_group: req.group,
        topic: topic.clone(),
        queue_id: mq.queue_id,
        queue_offset: req.offset,
        max_msg_nums: req.batch_size,
        sys_flag: 0,
        commit_offset: req.offset,
        suspend_timeout_millis: 0,
        subscription: String::new(),
        sub_version: 0,
    };

    let bodies = client.pull_async(addr, header, DEFAULT_RPC_TIMEOUT).await?;
    let next_offset = req.offset + bodies.len() as i64;
    let messages = bodies.iter().map(|body| proto_message_from_body(&topic, body)).collect();

    Ok(v1::PullMessageResponse {
        status: Some(ok_status()),
        messages,
        next_offset,
    })
}

pub(crate) async fn query_offset(state: &ProxyState, req: v1::QueryOffsetRequest) -> Result<v1::QueryOffsetResponse, Status> {
    let mq = req.message_queue.ok_or_else(|| client_input("missing message queue"))?;
    let topic = mq.topic.map(|t| t.name).unwrap_or_default();
    if topic.is_empty() {
        return Err(client_input("missing topic"));
    }

    let route = state.route_cache.get_message_queue(&topic).await?;
    let broker = route
        .broker(&mq.broker_name)
        .ok_or_else(|| ProxyError::internal(format!("broker {} missing from route", mq.broker_name)))?;
    let addr = broker
        .master_addr()
        .ok_or_else(|| ProxyError::broker_unavailable(format!("no master address for broker {}", mq.broker_name)))?;
    let client = state.forward.get(proxy_core::forward::ClientRole::ReadConsumer, &mq.broker_name).await?;

    // A negative timestamp requests the queue's current max offset rather
    // than a timestamp-indexed search, mirroring the legacy broker's own
    // `queryOffset(timestamp = -1)` convention.
    let offset = if req.timestamp < 0 {
        client
            .get_max_offset_async(addr, GetMaxOffsetRequestHeader { topic, queue_id: mq.queue_id }, DEFAULT_RPC_TIMEOUT)
            .await?
    } else {
        client
            .search_offset_async(
                addr,
                SearchOffsetRequestHeader {
                    topic,
                    queue_id: mq.queue_id,
                    timestamp: req.timestamp,
                },
                DEFAULT_RPC_TIMEOUT,
            )
            .await?
    };

    Ok(v1::QueryOffsetResponse {
        status: Some(ok_status()),
        offset,
    })
}

pub(crate) async fn report_thread_stack_trace(
    state: &ProxyState,
    req: v1::ReportThreadStackTraceRequest,
) -> Result<v1::ReportThreadStackTraceResponse, Status> {
    let nonce: u64 = req
        .nonce
        .parse()
        .map_err(|_| client_input(format!("malformed nonce: {}", req.nonce)))?;
    state.relay.complete(proxy_core::relay::RelayResponse {
        nonce,
        payload: proxy_core::relay::RelayResponsePayload::ConsumerRunningInfo(req.thread_stack_trace),
    });
    Ok(v1::ReportThreadStackTraceResponse { status: Some(ok_status()) })
}

pub(crate) async fn report_message_consumption_result(
    state: &ProxyState,
    req: v1::ReportMessageConsumptionResultRequest,
) -> Result<v1::ReportMessageConsumptionResultResponse, Status> {
    let nonce: u64 = req
        .nonce
        .parse()
        .map_err(|_| client_input(format!("malformed nonce: {}", req.nonce)))?;
    state.relay.complete(proxy_core::relay::RelayResponse {
        nonce,
        payload: proxy_core::relay::RelayResponsePayload::ConsumeResult { consumed: req.consumed },
    });
    Ok(v1::ReportMessageConsumptionResultResponse { status: Some(ok_status()) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxy_core::config::{ProxyConfig, ProxyMode};
    use proxy_core::consumer::ConsumerEngine;
    use proxy_core::forward::{ClientFactory, ClientRole, ForwardClientPool};
    use proxy_core::producer::ProducerEngine;
    use proxy_core::relay::RelayChannel;
    use proxy_core::route_cache::{RouteResolver, TopicRouteCache};
    use proxy_core::transport::{BrokerTransport, IdentityEndpointConverter};
    use proxy_core::tx_heartbeat::{TxHeartbeatConfig, TxHeartbeatService};
    use std::collections::HashMap;
    use tonic::Code;

    struct NoOpFactory;

    #[async_trait::async_trait]
    impl ClientFactory for NoOpFactory {
        async fn create(&self, _role: ClientRole, _instance_name: &str) -> Result<std::sync::Arc<dyn BrokerTransport>, ProxyError> {
            Err(ProxyError::broker_unavailable("no-op"))
        }
    }

    struct FixedResolver(TopicRoute);

    #[async_trait::async_trait]
    impl RouteResolver for FixedResolver {
        async fn resolve(&self, _topic: &str) -> Result<TopicRoute, ProxyError> {
            Ok(self.0.clone())
        }
    }

    struct NotFoundResolver;

    #[async_trait::async_trait]
    impl RouteResolver for NotFoundResolver {
        async fn resolve(&self, topic: &str) -> Result<TopicRoute, ProxyError> {
            Err(ProxyError::topic_not_found(topic.to_string()))
        }
    }

    fn sample_route() -> TopicRoute {
        TopicRoute {
            queue_datas: vec![QueueData {
                broker_name: "b1".into(),
                read_queue_nums: 4,
                write_queue_nums: 4,
                perm: Perm::READ_WRITE,
            }],
            broker_datas: vec![BrokerData {
                cluster: "DefaultCluster".into(),
                broker_name: "b1".into(),
                broker_addrs: HashMap::from([(0, "10.0.0.1:10911".to_string())]),
            }],
        }
    }

    fn state_with(proxy_mode: ProxyMode, resolver: std::sync::Arc<dyn RouteResolver>) -> ProxyState {
        let forward = std::sync::Arc::new(ForwardClientPool::new(std::sync::Arc::new(NoOpFactory)));
        let route_cache = std::sync::Arc::new(TopicRouteCache::new(resolver, Duration::from_secs(30), Duration::from_secs(5)));
        let producer = std::sync::Arc::new(ProducerEngine::new(forward.clone(), route_cache.clone()));
        let consumer = std::sync::Arc::new(ConsumerEngine::new(forward.clone(), route_cache.clone(), producer.clone()));
        let tx_heartbeat = std::sync::Arc::new(TxHeartbeatService::new(
            forward.clone(),
            route_cache.clone(),
            TxHeartbeatConfig {
                period: Duration::from_secs(30),
                batch_num: 50,
                thread_pool_nums: 4,
                thread_pool_queue_capacity: 10_000,
            },
        ));

        ProxyState {
            config: ProxyConfig {
                proxy_mode,
                grpc_server_port: 0,
                namesrv_addr: "10.0.0.1:9876".into(),
                route_cache_ttl_millis: 30_000,
                long_polling_reserve_time_in_millis: 100,
                transaction_heartbeat_period_second: 30,
                transaction_heartbeat_batch_num: 50,
                transaction_heartbeat_thread_pool_nums: 4,
                transaction_heartbeat_thread_pool_queue_capacity: 10_000,
                grpc_proxy_relay_request_timeout_in_seconds: 3,
                grpc_client_channel_expire_seconds: 120,
                message_delay_level: "1s 5s 10s".into(),
                max_delivery_attempts: 16,
            },
            forward,
            route_cache,
            write_selector: proxy_core::select::WriteQueueSelector::new(),
            assignment_selector: proxy_core::select::AssignmentSelector::new(),
            producer,
            consumer,
            tx_heartbeat,
            relay: std::sync::Arc::new(RelayChannel::new(Duration::from_secs(3), Duration::from_secs(120))),
            converter: Box::new(IdentityEndpointConverter),
        }
    }

    #[tokio::test]
    async fn query_route_cluster_mode_rejects_missing_endpoints() {
        let state = state_with(ProxyMode::Cluster, std::sync::Arc::new(FixedResolver(sample_route())));
        let req = v1::QueryRouteRequest {
            topic: Some(resource("t")),
            endpoints: None,
        };
        let err = query_route(&state, req).await.unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn query_route_unknown_topic_is_not_found() {
        let state = state_with(ProxyMode::Local, std::sync::Arc::new(NotFoundResolver));
        let req = v1::QueryRouteRequest {
            topic: Some(resource("notExistTopic")),
            endpoints: None,
        };
        let err = query_route(&state, req).await.unwrap_err();
        assert_eq!(err.code(), Code::NotFound);
        assert!(err.message().contains("notExistTopic"));
    }

    fn metadata_with_timeout(raw: &str) -> MetadataMap {
        let mut metadata = MetadataMap::new();
        metadata.insert("grpc-timeout", raw.parse().unwrap());
        metadata
    }

    #[test]
    fn deadline_from_metadata_parses_every_unit() {
        assert_eq!(deadline_from_metadata(&metadata_with_timeout("1H")), Some(Duration::from_secs(3600)));
        assert_eq!(deadline_from_metadata(&metadata_with_timeout("2M")), Some(Duration::from_secs(120)));
        assert_eq!(deadline_from_metadata(&metadata_with_timeout("30S")), Some(Duration::from_secs(30)));
        assert_eq!(deadline_from_metadata(&metadata_with_timeout("500m")), Some(Duration::from_millis(500)));
        assert_eq!(deadline_from_metadata(&metadata_with_timeout("10u")), Some(Duration::from_micros(10)));
        assert_eq!(deadline_from_metadata(&metadata_with_timeout("100n")), Some(Duration::from_nanos(100)));
    }

    #[test]
    fn deadline_from_metadata_absent_is_none() {
        assert_eq!(deadline_from_metadata(&MetadataMap::new()), None);
    }

    #[test]
    fn deadline_from_metadata_malformed_is_none() {
        assert_eq!(deadline_from_metadata(&metadata_with_timeout("notanumber")), None);
        assert_eq!(deadline_from_metadata(&metadata_with_timeout("42X")), None);
    }
}
