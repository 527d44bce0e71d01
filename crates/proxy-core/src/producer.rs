//! The producer-side engine: send, send-back, end-transaction (spec
//! §4.4).
//!
//! Retriable broker errors (`FLUSH_DISK_TIMEOUT`, `FLUSH_SLAVE_TIMEOUT`,
//! `SLAVE_NOT_AVAILABLE`) are reported to the caller unchanged as
//! `BrokerTransient` — retry policy lives above the proxy, not in this
//! engine.

use crate::canonical::{EndTransactionRequest, SendMessageRequest, SendMessageResult};
use crate::error::ProxyError;
use crate::forward::{ClientRole, ForwardClientPool};
use crate::model::{BrokerData, TransactionId};
use crate::remoting::{
    ConsumerSendMsgBackRequestHeader, EndTransactionRequestHeader, SendMessageRequestHeader,
};
use crate::route_cache::TopicRouteCache;
use std::sync::Arc;
use uuid::Uuid;

/// Broker-reported codes that are retriable by the caller rather than
/// fatal to the proxy's own request handling.
const RETRIABLE_BROKER_MESSAGES: &[&str] =
    &["FLUSH_DISK_TIMEOUT", "FLUSH_SLAVE_TIMEOUT", "SLAVE_NOT_AVAILABLE"];

pub struct ProducerEngine {
    forward: Arc<ForwardClientPool>,
    route_cache: Arc<TopicRouteCache>,
}

impl ProducerEngine {
    pub fn new(forward: Arc<ForwardClientPool>, route_cache: Arc<TopicRouteCache>) -> Self {
        Self { forward, route_cache }
    }

    /// Sends one or more messages to the already-selected queue. Batches
    /// are serialized with a synthesized client id before transmission so
    /// the broker can attribute per-batch retries.
    pub async fn send(&self, request: SendMessageRequest) -> Result<SendMessageResult, ProxyError> {
        let route = self.route_cache.get_message_queue(&request.queue.topic).await?;
        let broker = route
            .broker(&request.queue.broker_name)
            .ok_or_else(|| ProxyError::internal(format!(
                "selected broker {} missing from route for topic {}",
                request.queue.broker_name, request.queue.topic
            )))?;
        let addr = master_addr(broker)?;

        let client = self.forward.get(ClientRole::Producer, &request.queue.broker_name).await?;

        let client_id = if request.messages.len() > 1 {
            Some(format!("rmq-proxy-batch-{}", Uuid::new_v4()))
        } else {
            None
        };

        let header = SendMessageRequestHeader {
            producer_group: request.producer_group.clone(),
            topic: request.queue.topic.clone(),
            queue_id: request.queue.queue_id,
            sys_flag: 0,
            born_timestamp: now_millis(),
            flag: 0,
            properties: encode_properties(&request.properties),
            reconsume_times: 0,
            batch: request.messages.len() > 1,
        };

        let mut payload = Vec::new();
        for msg in &request.messages {
            payload.extend_from_slice(&msg.payload);
        }
        let body = crate::remoting::MessageBody {
            payload,
            properties: request.properties.clone(),
        };

        let resp = client
            .send_async(addr, header, body, request.timeout)
            .await
            .map_err(|e| annotate_client_id(e, client_id.as_deref()))?;

        let transaction_id = resp.transaction_id.map(|broker_transaction_id| {
            TransactionId {
                proxy_transaction_id: format!("rmq-proxy-tx-{}", Uuid::new_v4()),
                broker_name: request.queue.broker_name.clone(),
                broker_transaction_id,
                commit_log_offset: resp.commit_log_offset,
                queue_offset: resp.queue_offset,
            }
            .encode()
        });

        Ok(SendMessageResult {
            msg_ids: vec![resp.msg_id],
            queue_id: resp.queue_id,
            queue_offset: resp.queue_offset,
            transaction_id,
        })
    }

    /// Routes a message to its retry or DLQ topic depending on reconsume
    /// count vs. the consumer group's policy. Used directly by callers
    /// that already know the target broker address (e.g. the consumer
    /// engine's nack path), so it is not routed through the selector.
    pub async fn send_message_back(
        &self,
        broker_name: &str,
        header: ConsumerSendMsgBackRequestHeader,
        timeout: std::time::Duration,
    ) -> Result<(), ProxyError> {
        let route = self.route_cache.get_message_queue(&header.origin_topic).await?;
        let broker = route
            .broker(broker_name)
            .ok_or_else(|| ProxyError::internal(format!("unknown broker {broker_name}")))?;
        let addr = master_addr(broker)?;
        let client = self.forward.get(ClientRole::Producer, broker_name).await?;
        client.send_msg_back_async(addr, header, timeout).await
    }

    /// One-way commit/rollback to the broker that originated the
    /// half-message, resolved from the transaction id's embedded broker
    /// name.
    pub async fn end_transaction(
        &self,
        broker_name: &str,
        request: EndTransactionRequest,
        timeout: std::time::Duration,
    ) -> Result<(), ProxyError> {
        let route = self.route_cache.get_message_queue(&request.topic).await?;
        let broker = route
            .broker(broker_name)
            .ok_or_else(|| ProxyError::internal(format!("unknown broker {broker_name}")))?;
        let addr = master_addr(broker)?;
        let client = self.forward.get(ClientRole::TransactionProducer, broker_name).await?;

        let header = EndTransactionRequestHeader {
            producer_group: request.producer_group,
            tran_state_table_offset: request.queue_offset,
            commit_log_offset: request.commit_log_offset,
            commit: request.commit,
            from_transaction_check: request.from_transaction_check,
            msg_id: request.msg_id,
            transaction_id: request.transaction_id,
        };
        client.end_transaction_async(addr, header, timeout).await
    }
}

fn master_addr(broker: &BrokerData) -> Result<&str, ProxyError> {
    broker
        .master_addr()
        .ok_or_else(|| ProxyError::broker_unavailable(format!("no master address for broker {}", broker.broker_name)))
}

fn encode_properties(properties: &std::collections::HashMap<String, String>) -> String {
    properties
        .iter()
        .map(|(k, v)| format!("{k}\u{1}{v}"))
        .collect::<Vec<_>>()
        .join("\u{2}")
}

fn annotate_client_id(err: ProxyError, client_id: Option<&str>) -> ProxyError {
    match client_id {
        Some(id) if err.is_retriable() => {
            tracing::debug!(client_id = id, "retriable error on batch send");
            err
        }
        _ => err,
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// True if a broker-reported remark names a known retriable condition.
pub fn is_retriable_broker_message(remark: &str) -> bool {
    RETRIABLE_BROKER_MESSAGES.iter().any(|m| remark.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_retriable_broker_remarks() {
        assert!(is_retriable_broker_message("FLUSH_DISK_TIMEOUT: slave lag"));
        assert!(is_retriable_broker_message("SLAVE_NOT_AVAILABLE"));
        assert!(!is_retriable_broker_message("ILLEGAL_ARGUMENT"));
    }

    #[test]
    fn encodes_properties_with_reserved_separators() {
        let mut props = std::collections::HashMap::new();
        props.insert("TAGS".to_string(), "order".to_string());
        let encoded = encode_properties(&props);
        assert_eq!(encoded, "TAGS\u{1}order");
    }
}
