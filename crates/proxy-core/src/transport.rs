//! Local-mode / cluster-mode broker transport (spec §4.10).
//!
//! The legacy binary wire codec is explicitly out of scope (spec §1); this
//! module defines the narrow async surface `proxy-core` needs from it —
//! [`BrokerTransport`] — so the engines never depend on a concrete codec
//! or TCP client. Production wiring supplies a `ClusterTransport` backed
//! by whatever codec crate owns `RemotingCommand` framing; tests supply a
//! mock implementing the same trait.

use crate::error::ProxyError;
use crate::remoting::{
    AckMessageRequestHeader, AckStatus, ChangeInvisibleTimeRequestHeader,
    ChangeInvisibleTimeResponseHeader, ConsumerSendMsgBackRequestHeader,
    EndTransactionRequestHeader, GetMaxOffsetRequestHeader, HeartbeatData, MessageBody,
    PopMessageRequestHeader, PopMessageResponseHeader, PullMessageRequestHeader,
    SearchOffsetRequestHeader, SendMessageRequestHeader, SendMessageResponseHeader,
};
use crate::resilience::{
    CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerManager, RetryConfig, RetryExecutor, RetryPolicy,
};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// The async surface a forward client must expose to every engine in this
/// crate, named after the broker's own RPC methods (spec §1's explicit
/// boundary: `sendAsync`, `popAsync`, `ackAsync`, `heartbeatAsync`,
/// `pullAsync`, `searchOffsetAsync`, `getMaxOffsetAsync`,
/// `sendMsgBackAsync`).
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    async fn send_async(
        &self,
        addr: &str,
        header: SendMessageRequestHeader,
        body: MessageBody,
        timeout: Duration,
    ) -> Result<SendMessageResponseHeader, ProxyError>;

    async fn pop_async(
        &self,
        addr: &str,
        header: PopMessageRequestHeader,
        timeout: Duration,
    ) -> Result<(PopMessageResponseHeader, Vec<MessageBody>), ProxyError>;

    async fn ack_async(
        &self,
        addr: &str,
        header: AckMessageRequestHeader,
        timeout: Duration,
    ) -> Result<AckStatus, ProxyError>;

    async fn change_invisible_time_async(
        &self,
        addr: &str,
        header: ChangeInvisibleTimeRequestHeader,
        timeout: Duration,
    ) -> Result<ChangeInvisibleTimeResponseHeader, ProxyError>;

    async fn send_msg_back_async(
        &self,
        addr: &str,
        header: ConsumerSendMsgBackRequestHeader,
        timeout: Duration,
    ) -> Result<(), ProxyError>;

    async fn end_transaction_async(
        &self,
        addr: &str,
        header: EndTransactionRequestHeader,
        timeout: Duration,
    ) -> Result<(), ProxyError>;

    async fn heartbeat_async(
        &self,
        addr: &str,
        data: HeartbeatData,
        timeout: Duration,
    ) -> Result<(), ProxyError>;

    async fn pull_async(
        &self,
        addr: &str,
        header: PullMessageRequestHeader,
        timeout: Duration,
    ) -> Result<Vec<MessageBody>, ProxyError>;

    async fn search_offset_async(
        &self,
        addr: &str,
        header: SearchOffsetRequestHeader,
        timeout: Duration,
    ) -> Result<i64, ProxyError>;

    async fn get_max_offset_async(
        &self,
        addr: &str,
        header: GetMaxOffsetRequestHeader,
        timeout: Duration,
    ) -> Result<i64, ProxyError>;
}

/// Rewrites an internally-known broker address into the one advertised to
/// clients (e.g. publishing a DNS name in place of a raw IP). Identity by
/// default; cluster deployments plug in their own.
pub trait EndpointConverter: Send + Sync {
    fn convert(&self, internal_addr: &str) -> String;
}

/// The identity converter: advertises broker addresses unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityEndpointConverter;

impl EndpointConverter for IdentityEndpointConverter {
    fn convert(&self, internal_addr: &str) -> String {
        internal_addr.to_string()
    }
}

/// Retries only the errors `ProxyError::is_retriable` recognizes
/// (`BrokerTransient`) — a connection refusal or a client error must never
/// be retried transparently underneath the engines.
struct RetryTransientOnly;

impl RetryPolicy for RetryTransientOnly {
    fn should_retry(&self, error: &dyn std::error::Error) -> bool {
        error
            .downcast_ref::<ProxyError>()
            .map(ProxyError::is_retriable)
            .unwrap_or(false)
    }
}

/// Cluster-mode transport: every call goes out over the codec supplied by
/// `inner`, with endpoint rewriting via `converter` applied only to
/// addresses advertised back to clients — outgoing calls always dial the
/// real, unconverted address.
///
/// Every outbound call is gated behind a per-broker-address circuit
/// breaker so a downed broker fails fast instead of queuing requests
/// behind a dead connection (spec §4's resilience carry-over). The
/// read-only calls (`pop`/`pull`/`searchOffset`/`getMaxOffset`) are
/// additionally retried on `BrokerTransient`; the rest have side effects
/// on the broker and are left to the caller's own retry judgment.
pub struct ClusterTransport<T> {
    inner: T,
    converter: Box<dyn EndpointConverter>,
    breakers: CircuitBreakerManager,
    retry: RetryExecutor<RetryTransientOnly>,
}

impl<T> ClusterTransport<T> {
    pub fn new(inner: T, converter: Box<dyn EndpointConverter>) -> Self {
        Self {
            inner,
            converter,
            breakers: CircuitBreakerManager::new(CircuitBreakerConfig::default()),
            retry: RetryExecutor::with_policy(RetryConfig::default(), RetryTransientOnly),
        }
    }

    pub fn advertise(&self, internal_addr: &str) -> String {
        self.converter.convert(internal_addr)
    }

    async fn guarded<F, Fut, Tout>(&self, addr: &str, f: F) -> Result<Tout, ProxyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Tout, ProxyError>>,
    {
        self.breakers.get_or_create(addr).call(f).await.map_err(|err| match err {
            CircuitBreakerError::CircuitOpen(open) => ProxyError::broker_unavailable(open.to_string()),
            CircuitBreakerError::Inner(inner) => inner,
        })
    }
}

#[async_trait]
impl<T: BrokerTransport> BrokerTransport for ClusterTransport<T> {
    async fn send_async(
        &self,
        addr: &str,
        header: SendMessageRequestHeader,
        body: MessageBody,
        timeout: Duration,
    ) -> Result<SendMessageResponseHeader, ProxyError> {
        self.guarded(addr, || self.inner.send_async(addr, header, body, timeout)).await
    }

    async fn pop_async(
        &self,
        addr: &str,
        header: PopMessageRequestHeader,
        timeout: Duration,
    ) -> Result<(PopMessageResponseHeader, Vec<MessageBody>), ProxyError> {
        self.retry
            .execute("pop", || {
                let header = header.clone();
                async move { self.guarded(addr, || self.inner.pop_async(addr, header, timeout)).await }
            })
            .await
            .map_err(|e| e.last_error)
    }

    async fn ack_async(
        &self,
        addr: &str,
        header: AckMessageRequestHeader,
        timeout: Duration,
    ) -> Result<AckStatus, ProxyError> {
        self.guarded(addr, || self.inner.ack_async(addr, header, timeout)).await
    }

    async fn change_invisible_time_async(
        &self,
        addr: &str,
        header: ChangeInvisibleTimeRequestHeader,
        timeout: Duration,
    ) -> Result<ChangeInvisibleTimeResponseHeader, ProxyError> {
        self.guarded(addr, || self.inner.change_invisible_time_async(addr, header, timeout))
            .await
    }

    async fn send_msg_back_async(
        &self,
        addr: &str,
        header: ConsumerSendMsgBackRequestHeader,
        timeout: Duration,
    ) -> Result<(), ProxyError> {
        self.guarded(addr, || self.inner.send_msg_back_async(addr, header, timeout)).await
    }

    async fn end_transaction_async(
        &self,
        addr: &str,
        header: EndTransactionRequestHeader,
        timeout: Duration,
    ) -> Result<(), ProxyError> {
        self.guarded(addr, || self.inner.end_transaction_async(addr, header, timeout)).await
    }

    async fn heartbeat_async(
        &self,
        addr: &str,
        data: HeartbeatData,
        timeout: Duration,
    ) -> Result<(), ProxyError> {
        self.guarded(addr, || self.inner.heartbeat_async(addr, data, timeout)).await
    }

    async fn pull_async(
        &self,
        addr: &str,
        header: PullMessageRequestHeader,
        timeout: Duration,
    ) -> Result<Vec<MessageBody>, ProxyError> {
        self.retry
            .execute("pull", || {
                let header = header.clone();
                async move { self.guarded(addr, || self.inner.pull_async(addr, header, timeout)).await }
            })
            .await
            .map_err(|e| e.last_error)
    }

    async fn search_offset_async(
        &self,
        addr: &str,
        header: SearchOffsetRequestHeader,
        timeout: Duration,
    ) -> Result<i64, ProxyError> {
        self.retry
            .execute("search_offset", || {
                let header = header.clone();
                async move { self.guarded(addr, || self.inner.search_offset_async(addr, header, timeout)).await }
            })
            .await
            .map_err(|e| e.last_error)
    }

    async fn get_max_offset_async(
        &self,
        addr: &str,
        header: GetMaxOffsetRequestHeader,
        timeout: Duration,
    ) -> Result<i64, ProxyError> {
        self.retry
            .execute("get_max_offset", || {
                let header = header.clone();
                async move { self.guarded(addr, || self.inner.get_max_offset_async(addr, header, timeout)).await }
            })
            .await
            .map_err(|e| e.last_error)
    }
}

/// Local-mode transport: bypasses the network entirely by calling the
/// co-located broker's own request processor in-process. `Processor` is
/// the narrow callback the host binary supplies; `proxy-core` has no
/// dependency on the broker's internal request-processing types.
pub struct LocalTransport<P> {
    processor: P,
}

/// The in-process call the local broker exposes, matching the broker's
/// own `asyncProcessRequest(code, header, body) -> Response` shape
/// narrowly enough that `proxy-core` needs no broker-internal types.
#[async_trait]
pub trait LocalRequestProcessor: Send + Sync {
    async fn process_send(
        &self,
        header: SendMessageRequestHeader,
        body: MessageBody,
    ) -> Result<SendMessageResponseHeader, ProxyError>;

    async fn process_pop(
        &self,
        header: PopMessageRequestHeader,
    ) -> Result<(PopMessageResponseHeader, Vec<MessageBody>), ProxyError>;

    async fn process_ack(&self, header: AckMessageRequestHeader) -> Result<AckStatus, ProxyError>;

    async fn process_change_invisible_time(
        &self,
        header: ChangeInvisibleTimeRequestHeader,
    ) -> Result<ChangeInvisibleTimeResponseHeader, ProxyError>;

    async fn process_send_msg_back(
        &self,
        header: ConsumerSendMsgBackRequestHeader,
    ) -> Result<(), ProxyError>;

    async fn process_end_transaction(
        &self,
        header: EndTransactionRequestHeader,
    ) -> Result<(), ProxyError>;

    async fn process_heartbeat(&self, data: HeartbeatData) -> Result<(), ProxyError>;

    async fn process_pull(
        &self,
        header: PullMessageRequestHeader,
    ) -> Result<Vec<MessageBody>, ProxyError>;

    async fn process_search_offset(&self, header: SearchOffsetRequestHeader) -> Result<i64, ProxyError>;

    async fn process_get_max_offset(&self, header: GetMaxOffsetRequestHeader) -> Result<i64, ProxyError>;
}

impl<P: LocalRequestProcessor> LocalTransport<P> {
    pub fn new(processor: P) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl<P: LocalRequestProcessor> BrokerTransport for LocalTransport<P> {
    async fn send_async(
        &self,
        _addr: &str,
        header: SendMessageRequestHeader,
        body: MessageBody,
        _timeout: Duration,
    ) -> Result<SendMessageResponseHeader, ProxyError> {
        self.processor.process_send(header, body).await
    }

    async fn pop_async(
        &self,
        _addr: &str,
        header: PopMessageRequestHeader,
        _timeout: Duration,
    ) -> Result<(PopMessageResponseHeader, Vec<MessageBody>), ProxyError> {
        self.processor.process_pop(header).await
    }

    async fn ack_async(
        &self,
        _addr: &str,
        header: AckMessageRequestHeader,
        _timeout: Duration,
    ) -> Result<AckStatus, ProxyError> {
        self.processor.process_ack(header).await
    }

    async fn change_invisible_time_async(
        &self,
        _addr: &str,
        header: ChangeInvisibleTimeRequestHeader,
        _timeout: Duration,
    ) -> Result<ChangeInvisibleTimeResponseHeader, ProxyError> {
        self.processor.process_change_invisible_time(header).await
    }

    async fn send_msg_back_async(
        &self,
        _addr: &str,
        header: ConsumerSendMsgBackRequestHeader,
        _timeout: Duration,
    ) -> Result<(), ProxyError> {
        self.processor.process_send_msg_back(header).await
    }

    async fn end_transaction_async(
        &self,
        _addr: &str,
        header: EndTransactionRequestHeader,
        _timeout: Duration,
    ) -> Result<(), ProxyError> {
        self.processor.process_end_transaction(header).await
    }

    async fn heartbeat_async(
        &self,
        _addr: &str,
        data: HeartbeatData,
        _timeout: Duration,
    ) -> Result<(), ProxyError> {
        self.processor.process_heartbeat(data).await
    }

    async fn pull_async(
        &self,
        _addr: &str,
        header: PullMessageRequestHeader,
        _timeout: Duration,
    ) -> Result<Vec<MessageBody>, ProxyError> {
        self.processor.process_pull(header).await
    }

    async fn search_offset_async(
        &self,
        _addr: &str,
        header: SearchOffsetRequestHeader,
        _timeout: Duration,
    ) -> Result<i64, ProxyError> {
        self.processor.process_search_offset(header).await
    }

    async fn get_max_offset_async(
        &self,
        _addr: &str,
        header: GetMaxOffsetRequestHeader,
        _timeout: Duration,
    ) -> Result<i64, ProxyError> {
        self.processor.process_get_max_offset(header).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_converter_is_a_no_op() {
        let converter = IdentityEndpointConverter;
        assert_eq!(converter.convert("10.0.0.1:10911"), "10.0.0.1:10911");
    }
}
