//! The consumer-side engine: pop/receive, ack, nack, change-invisibility
//! (spec §4.5) — the heart of the proxy.

use crate::canonical::{
    AckMessageRequest, ChangeInvisibleDurationRequest, ChangeInvisibleDurationResult,
    NackMessageRequest, ReceiveMessageRequest, ReceiveMessageResult, ReceivedMessage,
};
use crate::error::ProxyError;
use crate::forward::{ClientRole, ForwardClientPool};
use crate::model::BrokerData;
use crate::receipt::{parse_offset_info, ReceiptHandle, POP_CK_PROPERTY};
use crate::remoting::{
    AckMessageRequestHeader, AckStatus, ChangeInvisibleTimeRequestHeader,
    ConsumerSendMsgBackRequestHeader, MessageBody, PopMessageRequestHeader, PopStatus,
};
use crate::retry_policy::NackBackoffConfig;
use crate::select::ReadQueueSelector;
use std::sync::Arc;
use std::time::Duration;

pub struct ConsumerEngine {
    forward: Arc<ForwardClientPool>,
    route_cache: Arc<crate::route_cache::TopicRouteCache>,
    selector: ReadQueueSelector,
    backoff: NackBackoffConfig,
    producer: Arc<crate::producer::ProducerEngine>,
}

impl ConsumerEngine {
    pub fn new(
        forward: Arc<ForwardClientPool>,
        route_cache: Arc<crate::route_cache::TopicRouteCache>,
        producer: Arc<crate::producer::ProducerEngine>,
    ) -> Self {
        Self {
            forward,
            route_cache,
            selector: ReadQueueSelector::new(),
            backoff: NackBackoffConfig::default(),
            producer,
        }
    }

    /// Step-by-step per spec §4.5: check filter syntax, select a readable
    /// queue, pop with a deadline shortened by the long-polling reserve,
    /// synthesize receipt handles for survivors, drop tag-filtered
    /// messages silently.
    pub async fn receive(
        &self,
        request: ReceiveMessageRequest,
        long_polling_reserve: Duration,
    ) -> Result<ReceiveMessageResult, ProxyError> {
        check_subscription_syntax(&request.subscription_expression)?;

        let route = self.route_cache.get_message_queue(&request.topic).await?;
        let queue = self
            .selector
            .select(&request.topic, &request.group, &route)
            .ok_or_else(|| ProxyError::no_readable_queue(request.topic.clone()))?;
        let broker = route
            .broker(&queue.broker_name)
            .ok_or_else(|| ProxyError::internal(format!("broker {} missing from route", queue.broker_name)))?;
        let addr = master_addr(broker)?;

        let pop_deadline = request
            .call_deadline
            .saturating_sub(long_polling_reserve)
            .min(request.poll_timeout);

        let client = self.forward.get(ClientRole::ReadConsumer, &queue.broker_name).await?;
        let header = PopMessageRequestHeader {
            consumer_group: request.group.clone(),
            topic: request.topic.clone(),
            queue_id: queue.queue_id,
            max_msg_nums: request.max_messages,
            invisible_time: request.invisible_duration.as_millis() as i64,
            poll_time: pop_deadline.as_millis() as i64,
            born_time: now_millis(),
            init_mode: request.init_mode,
            exp_type: "TAG".to_string(),
            exp: request.subscription_expression.clone(),
            order: request.fifo,
        };

        let (resp_header, bodies) = match client.pop_async(addr, header, pop_deadline).await {
            Ok(v) => v,
            Err(e) => return Err(e),
        };

        match resp_header.status {
            PopStatus::PollingFull => return Err(ProxyError::throttled("pop admission queue full")),
            PopStatus::NoNewMsg | PopStatus::PollingNotFound => {
                return Ok(ReceiveMessageResult::default())
            }
            PopStatus::Found => {}
        }

        let order_counts = resp_header
            .order_count_info
            .as_deref()
            .map(parse_order_count_info)
            .unwrap_or_default();

        // `startOffsetInfo` reports one entry per popped queue (the offset
        // the pop started at); `msgOffsetInfo` reports one entry per
        // returned message, in pop order, for whichever queue it came
        // from. Only our selected queue's entries are relevant here since
        // this proxy pops one queue per request.
        let start_offset = parse_offset_info(&resp_header.start_offset_info)
            .into_iter()
            .find(|(qid, _)| *qid == queue.queue_id)
            .map(|(_, offset)| offset)
            .unwrap_or(0);
        let msg_offsets: Vec<i64> = parse_offset_info(&resp_header.msg_offset_info)
            .into_iter()
            .filter(|(qid, _)| *qid == queue.queue_id)
            .map(|(_, offset)| offset)
            .collect();

        let mut messages = Vec::with_capacity(bodies.len());
        for (i, mut body) in bodies.into_iter().enumerate() {
            let handle = ReceiptHandle {
                start_offset,
                pop_time: resp_header.pop_time,
                invisible_time: resp_header.invisible_time,
                revive_qid: resp_header.revive_qid,
                topic: request.topic.clone(),
                broker_name: queue.broker_name.clone(),
                queue_id: queue.queue_id,
                queue_offset: msg_offsets.get(i).copied(),
            };
            let encoded = handle.encode();

            if !tag_matches(&request.subscription_expression, &body) {
                // Non-matching messages still consumed an offset; ack them
                // silently so the broker advances past them instead of
                // redelivering on expiry (spec §4.5 step 4).
                if let Err(e) = self
                    .ack_handle(&request.topic, &request.group, &handle, FILTER_DROP_ACK_TIMEOUT)
                    .await
                {
                    tracing::warn!(error = %e, "failed to ack tag-filtered message");
                }
                continue;
            }

            body.properties.insert(POP_CK_PROPERTY.to_string(), encoded.clone());

            let reconsume_times = if request.fifo {
                order_counts.get(i).copied().unwrap_or(0)
            } else {
                0
            };

            messages.push(ReceivedMessage {
                body,
                receipt_handle: encoded,
                reconsume_times,
            });
        }

        Ok(ReceiveMessageResult {
            messages,
            throttled: false,
        })
    }

    /// Decodes the handle, resolves the broker through the route cache,
    /// and forwards the ack. Returns `Ok` only if the broker's own
    /// `AckStatus` is `Ok`.
    pub async fn ack(&self, request: AckMessageRequest) -> Result<(), ProxyError> {
        let handle = ReceiptHandle::decode(&request.receipt_handle)?;
        self.ack_handle(&request.topic, &request.consumer_group, &handle, request.timeout)
            .await
    }

    async fn ack_handle(
        &self,
        topic: &str,
        consumer_group: &str,
        handle: &ReceiptHandle,
        timeout: Duration,
    ) -> Result<(), ProxyError> {
        let route = self.route_cache.get_message_queue(topic).await?;
        let broker = route
            .broker(&handle.broker_name)
            .ok_or_else(|| ProxyError::internal(format!("broker {} missing from route", handle.broker_name)))?;
        let addr = master_addr(broker)?;
        let client = self.forward.get(ClientRole::ReadConsumer, &handle.broker_name).await?;

        let header = AckMessageRequestHeader {
            consumer_group: consumer_group.to_string(),
            topic: topic.to_string(),
            queue_id: handle.queue_id,
            extra_info: handle.encode(),
            offset: handle.queue_offset.unwrap_or(handle.start_offset),
        };

        match client.ack_async(addr, header, timeout).await? {
            AckStatus::Ok => Ok(()),
            // §9's recorded decision: non-OK AckStatus maps to a generic
            // Internal error rather than a more specific kind.
            AckStatus::Error => Err(ProxyError::internal("broker rejected ack")),
        }
    }

    /// If `deliveryAttempt >= maxDeliveryAttempts`, forwards to the
    /// group's DLQ via `sendMessageBack` and, on success, acks the
    /// original handle; does not ack on failure. Otherwise extends
    /// invisibility per the nack backoff policy.
    pub async fn nack(&self, request: NackMessageRequest) -> Result<(), ProxyError> {
        let handle = ReceiptHandle::decode(&request.receipt_handle)?;

        if request.delivery_attempt >= request.max_delivery_attempts {
            let header = ConsumerSendMsgBackRequestHeader {
                group: request.consumer_group.clone(),
                offset: handle.queue_offset.unwrap_or(handle.start_offset),
                delay_level: -1,
                origin_msg_id: String::new(),
                origin_topic: request.topic.clone(),
                max_reconsume_times: request.max_delivery_attempts as i32,
            };
            self.producer
                .send_message_back(&handle.broker_name, header, request.timeout)
                .await?;
            return self
                .ack_handle(&request.topic, &request.consumer_group, &handle, request.timeout)
                .await;
        }

        let invisible = self.backoff.invisible_duration(request.delivery_attempt);
        self.change_invisible_duration(ChangeInvisibleDurationRequest {
            topic: request.topic,
            consumer_group: request.consumer_group,
            receipt_handle: request.receipt_handle,
            invisible_duration: invisible,
            timeout: request.timeout,
        })
        .await
        .map(|_| ())
    }

    /// The returned handle is new; per spec §4.5 the old handle becomes
    /// invalid the moment the broker accepts the change.
    pub async fn change_invisible_duration(
        &self,
        request: ChangeInvisibleDurationRequest,
    ) -> Result<ChangeInvisibleDurationResult, ProxyError> {
        let handle = ReceiptHandle::decode(&request.receipt_handle)?;
        let route = self.route_cache.get_message_queue(&request.topic).await?;
        let broker = route
            .broker(&handle.broker_name)
            .ok_or_else(|| ProxyError::internal(format!("broker {} missing from route", handle.broker_name)))?;
        let addr = master_addr(broker)?;
        let client = self.forward.get(ClientRole::ReadConsumer, &handle.broker_name).await?;

        let header = ChangeInvisibleTimeRequestHeader {
            consumer_group: request.consumer_group,
            topic: request.topic,
            queue_id: handle.queue_id,
            extra_info: handle.encode(),
            invisible_time: request.invisible_duration.as_millis() as i64,
        };

        let resp = client
            .change_invisible_time_async(addr, header, request.timeout)
            .await?;

        Ok(ChangeInvisibleDurationResult {
            new_receipt_handle: resp.extra_info,
        })
    }
}

/// Timeout for the ack the engine issues on the caller's behalf to drop a
/// tag-filtered message; not driven by any client-supplied deadline.
const FILTER_DROP_ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// The property a message's tag travels under, matching the broker's own
/// reserved property name.
const TAG_PROPERTY: &str = "TAGS";

/// True if `body`'s tag satisfies `subscription_expression`. An empty or
/// `"*"` expression matches everything; otherwise the expression is a
/// `||`-separated list of exact tags (spec §4.5 step 4 — no SQL filter
/// support, tag-only).
fn tag_matches(subscription_expression: &str, body: &MessageBody) -> bool {
    let expr = subscription_expression.trim();
    if expr.is_empty() || expr == "*" {
        return true;
    }
    let tag = body.properties.get(TAG_PROPERTY).map(String::as_str).unwrap_or("");
    expr.split("||").any(|candidate| candidate.trim() == tag)
}

fn master_addr(broker: &BrokerData) -> Result<&str, ProxyError> {
    broker
        .master_addr()
        .ok_or_else(|| ProxyError::broker_unavailable(format!("no master address for broker {}", broker.broker_name)))
}

fn check_subscription_syntax(expr: &str) -> Result<(), ProxyError> {
    if expr.is_empty() {
        return Ok(());
    }
    if expr.contains("**") || expr.starts_with('|') || expr.ends_with('|') {
        return Err(ProxyError::client_input(format!("malformed subscription expression: {expr}")));
    }
    Ok(())
}

/// Parses the broker's `orderCountInfo` header (`queueId⎵count,queueId⎵count...`
/// in the broker's own notation) into per-message reconsume counts in pop
/// order. Kept permissive: unparsable segments are skipped rather than
/// failing the whole receive.
fn parse_order_count_info(raw: &str) -> Vec<i32> {
    raw.split(',')
        .filter_map(|segment| segment.rsplit_once(' ').and_then(|(_, count)| count.parse().ok()))
        .collect()
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_subscription_expressions() {
        assert!(check_subscription_syntax("a**b").is_err());
        assert!(check_subscription_syntax("|tag").is_err());
        assert!(check_subscription_syntax("tag|").is_err());
        assert!(check_subscription_syntax("").is_ok());
        assert!(check_subscription_syntax("tagA || tagB").is_ok());
    }

    #[test]
    fn parses_order_count_info() {
        let counts = parse_order_count_info("0 1,1 3,2 0");
        assert_eq!(counts, vec![1, 3, 0]);
    }

    fn tagged(tag: &str) -> MessageBody {
        let mut body = MessageBody::default();
        body.properties.insert(TAG_PROPERTY.to_string(), tag.to_string());
        body
    }

    #[test]
    fn empty_or_star_expression_matches_everything() {
        assert!(tag_matches("", &tagged("orderPlaced")));
        assert!(tag_matches("*", &tagged("orderPlaced")));
        assert!(tag_matches("", &MessageBody::default()));
    }

    #[test]
    fn matches_one_of_the_or_separated_tags() {
        assert!(tag_matches("orderPlaced || orderCancelled", &tagged("orderCancelled")));
        assert!(!tag_matches("orderPlaced || orderCancelled", &tagged("orderShipped")));
    }

    #[test]
    fn untagged_message_only_matches_wildcard() {
        assert!(!tag_matches("orderPlaced", &MessageBody::default()));
    }
}
