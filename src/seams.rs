//! External-collaborator seams.
//!
//! The legacy broker's binary wire codec, a co-located embedded broker,
//! and the name-service's own wire client are all out of scope (spec
//! §1) — `proxy-core` only defines the narrow traits it needs from them
//! ([`BrokerTransport`], [`LocalRequestProcessor`], [`RouteResolver`]).
//! This module supplies the adapters that let `proxy-server` actually
//! construct and run: client construction always succeeds, so the
//! forward-client pool's singleflight caching is exercised normally, but
//! every call into the transport itself fails with `BrokerUnavailable`.
//! Swapping in a real broker/name-server client means replacing the
//! types in this file; nothing above this layer changes.

use async_trait::async_trait;
use proxy_core::config::ProxyMode;
use proxy_core::error::ProxyError;
use proxy_core::forward::{ClientFactory, ClientRole};
use proxy_core::model::TopicRoute;
use proxy_core::remoting::{
    AckMessageRequestHeader, AckStatus, ChangeInvisibleTimeRequestHeader,
    ChangeInvisibleTimeResponseHeader, ConsumerSendMsgBackRequestHeader,
    EndTransactionRequestHeader, GetMaxOffsetRequestHeader, HeartbeatData, MessageBody,
    PopMessageRequestHeader, PopMessageResponseHeader, PullMessageRequestHeader,
    SearchOffsetRequestHeader, SendMessageRequestHeader, SendMessageResponseHeader,
};
use proxy_core::route_cache::RouteResolver;
use proxy_core::transport::{
    BrokerTransport, ClusterTransport, EndpointConverter, IdentityEndpointConverter,
    LocalRequestProcessor, LocalTransport,
};
use std::sync::Arc;
use std::time::Duration;

/// Resolves topic routes through the name-service. Always fails: the
/// name-server's wire protocol is not part of this proxy's scope, so
/// every lookup falls through `TopicRouteCache`'s negative caching until
/// a real client is wired in here.
pub struct NameServiceRouteResolver {
    namesrv_addr: String,
}

impl NameServiceRouteResolver {
    pub fn new(namesrv_addr: String) -> Self {
        Self { namesrv_addr }
    }
}

#[async_trait]
impl RouteResolver for NameServiceRouteResolver {
    async fn resolve(&self, topic: &str) -> Result<TopicRoute, ProxyError> {
        Err(ProxyError::broker_unavailable(format!(
            "no name-server client wired to {}; cannot resolve route for topic {topic}",
            self.namesrv_addr
        )))
    }
}

/// Stands in for the framed `RemotingCommand` codec and its TCP client.
pub struct UnwiredBrokerTransport;

#[async_trait]
impl BrokerTransport for UnwiredBrokerTransport {
    async fn send_async(
        &self,
        _addr: &str,
        _header: SendMessageRequestHeader,
        _body: MessageBody,
        _timeout: Duration,
    ) -> Result<SendMessageResponseHeader, ProxyError> {
        Err(ProxyError::broker_unavailable("no broker transport wired for sendAsync"))
    }

    async fn pop_async(
        &self,
        _addr: &str,
        _header: PopMessageRequestHeader,
        _timeout: Duration,
    ) -> Result<(PopMessageResponseHeader, Vec<MessageBody>), ProxyError> {
        Err(ProxyError::broker_unavailable("no broker transport wired for popAsync"))
    }

    async fn ack_async(
        &self,
        _addr: &str,
        _header: AckMessageRequestHeader,
        _timeout: Duration,
    ) -> Result<AckStatus, ProxyError> {
        Err(ProxyError::broker_unavailable("no broker transport wired for ackAsync"))
    }

    async fn change_invisible_time_async(
        &self,
        _addr: &str,
        _header: ChangeInvisibleTimeRequestHeader,
        _timeout: Duration,
    ) -> Result<ChangeInvisibleTimeResponseHeader, ProxyError> {
        Err(ProxyError::broker_unavailable(
            "no broker transport wired for changeInvisibleTimeAsync",
        ))
    }

    async fn send_msg_back_async(
        &self,
        _addr: &str,
        _header: ConsumerSendMsgBackRequestHeader,
        _timeout: Duration,
    ) -> Result<(), ProxyError> {
        Err(ProxyError::broker_unavailable("no broker transport wired for sendMsgBackAsync"))
    }

    async fn end_transaction_async(
        &self,
        _addr: &str,
        _header: EndTransactionRequestHeader,
        _timeout: Duration,
    ) -> Result<(), ProxyError> {
        Err(ProxyError::broker_unavailable("no broker transport wired for endTransactionAsync"))
    }

    async fn heartbeat_async(
        &self,
        _addr: &str,
        _data: HeartbeatData,
        _timeout: Duration,
    ) -> Result<(), ProxyError> {
        Err(ProxyError::broker_unavailable("no broker transport wired for heartbeatAsync"))
    }

    async fn pull_async(
        &self,
        _addr: &str,
        _header: PullMessageRequestHeader,
        _timeout: Duration,
    ) -> Result<Vec<MessageBody>, ProxyError> {
        Err(ProxyError::broker_unavailable("no broker transport wired for pullAsync"))
    }

    async fn search_offset_async(
        &self,
        _addr: &str,
        _header: SearchOffsetRequestHeader,
        _timeout: Duration,
    ) -> Result<i64, ProxyError> {
        Err(ProxyError::broker_unavailable("no broker transport wired for searchOffsetAsync"))
    }

    async fn get_max_offset_async(
        &self,
        _addr: &str,
        _header: GetMaxOffsetRequestHeader,
        _timeout: Duration,
    ) -> Result<i64, ProxyError> {
        Err(ProxyError::broker_unavailable("no broker transport wired for getMaxOffsetAsync"))
    }
}

/// Mirrors [`UnwiredBrokerTransport`] for local mode's co-located broker.
pub struct UnwiredLocalRequestProcessor;

#[async_trait]
impl LocalRequestProcessor for UnwiredLocalRequestProcessor {
    async fn process_send(
        &self,
        _header: SendMessageRequestHeader,
        _body: MessageBody,
    ) -> Result<SendMessageResponseHeader, ProxyError> {
        Err(ProxyError::broker_unavailable("no local broker wired for processSend"))
    }

    async fn process_pop(
        &self,
        _header: PopMessageRequestHeader,
    ) -> Result<(PopMessageResponseHeader, Vec<MessageBody>), ProxyError> {
        Err(ProxyError::broker_unavailable("no local broker wired for processPop"))
    }

    async fn process_ack(&self, _header: AckMessageRequestHeader) -> Result<AckStatus, ProxyError> {
        Err(ProxyError::broker_unavailable("no local broker wired for processAck"))
    }

    async fn process_change_invisible_time(
        &self,
        _header: ChangeInvisibleTimeRequestHeader,
    ) -> Result<ChangeInvisibleTimeResponseHeader, ProxyError> {
        Err(ProxyError::broker_unavailable(
            "no local broker wired for processChangeInvisibleTime",
        ))
    }

    async fn process_send_msg_back(
        &self,
        _header: ConsumerSendMsgBackRequestHeader,
    ) -> Result<(), ProxyError> {
        Err(ProxyError::broker_unavailable("no local broker wired for processSendMsgBack"))
    }

    async fn process_end_transaction(
        &self,
        _header: EndTransactionRequestHeader,
    ) -> Result<(), ProxyError> {
        Err(ProxyError::broker_unavailable("no local broker wired for processEndTransaction"))
    }

    async fn process_heartbeat(&self, _data: HeartbeatData) -> Result<(), ProxyError> {
        Err(ProxyError::broker_unavailable("no local broker wired for processHeartbeat"))
    }

    async fn process_pull(&self, _header: PullMessageRequestHeader) -> Result<Vec<MessageBody>, ProxyError> {
        Err(ProxyError::broker_unavailable("no local broker wired for processPull"))
    }

    async fn process_search_offset(&self, _header: SearchOffsetRequestHeader) -> Result<i64, ProxyError> {
        Err(ProxyError::broker_unavailable("no local broker wired for processSearchOffset"))
    }

    async fn process_get_max_offset(&self, _header: GetMaxOffsetRequestHeader) -> Result<i64, ProxyError> {
        Err(ProxyError::broker_unavailable("no local broker wired for processGetMaxOffset"))
    }
}

/// Builds a forward client per the proxy's mode: `Cluster` wraps the
/// unwired transport in `ClusterTransport` behind an identity endpoint
/// converter; `Local` wraps it in `LocalTransport` over the unwired
/// request processor. Construction itself never fails, so
/// `ForwardClientPool`'s singleflight cache behaves as it would in
/// production; only the transport calls made through the client fail.
pub struct ModeClientFactory {
    mode: ProxyMode,
}

impl ModeClientFactory {
    pub fn new(mode: ProxyMode) -> Self {
        Self { mode }
    }
}

#[async_trait]
impl ClientFactory for ModeClientFactory {
    async fn create(
        &self,
        _role: ClientRole,
        _instance_name: &str,
    ) -> Result<Arc<dyn BrokerTransport>, ProxyError> {
        match self.mode {
            ProxyMode::Cluster => Ok(Arc::new(ClusterTransport::new(
                UnwiredBrokerTransport,
                Box::new(IdentityEndpointConverter) as Box<dyn EndpointConverter>,
            ))),
            ProxyMode::Local => Ok(Arc::new(LocalTransport::new(UnwiredLocalRequestProcessor))),
        }
    }
}

/// The endpoint converter advertised to clients in `QueryRoute`/
/// `QueryAssignment` responses. Identity in both modes until a
/// deployment supplies its own address-rewriting converter.
pub fn converter_for_mode(_mode: ProxyMode) -> Box<dyn EndpointConverter> {
    Box::new(IdentityEndpointConverter)
}
