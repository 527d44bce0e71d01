//! Topic route and queue data types (spec §3).
//!
//! These mirror the legacy broker's name-service route response closely
//! enough that [`crate::route_cache`] can cache them unmodified, but carry
//! no broker-wire-specific fields — decoding the broker's own route
//! payload into this shape happens at the [`crate::transport`] boundary.

use crate::error::ProxyError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Queue permission bits, matching the legacy broker's encoding: bit 2 is
/// read, bit 4 is write. `rw` (6) grants both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Perm(pub i32);

impl Perm {
    pub const NONE: Perm = Perm(0);
    pub const READ: Perm = Perm(4);
    pub const WRITE: Perm = Perm(2);
    pub const READ_WRITE: Perm = Perm(6);

    pub fn can_read(self) -> bool {
        self.0 & Self::READ.0 != 0
    }

    pub fn can_write(self) -> bool {
        self.0 & Self::WRITE.0 != 0
    }
}

/// Per-broker-name queue counts and permission, as reported by the
/// name-service for one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueData {
    pub broker_name: String,
    pub read_queue_nums: u32,
    pub write_queue_nums: u32,
    pub perm: Perm,
}

/// A broker group: its cluster, name, and the address of each numbered
/// replica (0 is always the master).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerData {
    pub cluster: String,
    pub broker_name: String,
    pub broker_addrs: HashMap<i64, String>,
}

impl BrokerData {
    pub fn master_addr(&self) -> Option<&str> {
        self.broker_addrs.get(&0).map(String::as_str)
    }
}

/// A topic's full route as returned by the name-service: queue layout
/// across every broker group hosting the topic, plus the broker groups
/// themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TopicRoute {
    pub queue_datas: Vec<QueueData>,
    pub broker_datas: Vec<BrokerData>,
}

impl TopicRoute {
    pub fn is_empty(&self) -> bool {
        self.queue_datas.is_empty() || self.broker_datas.is_empty()
    }

    pub fn broker(&self, broker_name: &str) -> Option<&BrokerData> {
        self.broker_datas.iter().find(|b| b.broker_name == broker_name)
    }
}

/// One concrete, selectable queue: a broker name, a queue id within that
/// broker, and the topic it belongs to. This is the unit [`crate::select`]
/// hands back to producer/consumer engines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectableMessageQueue {
    pub topic: String,
    pub broker_name: String,
    pub queue_id: i32,
}

impl SelectableMessageQueue {
    /// The placeholder queue id used by assignment-mode (pop load-balanced
    /// across the broker rather than pinned to one queue).
    pub const ASSIGNMENT_QUEUE_ID: i32 = -1;

    pub fn is_assignment(&self) -> bool {
        self.queue_id == Self::ASSIGNMENT_QUEUE_ID
    }
}

/// A transaction identifier, opaque to the proxy's client beyond what it
/// needs to route `endTransaction` back to the exact half-message the
/// broker is holding open.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId {
    /// Proxy-synthesized id, distinct from the broker's own, so the
    /// client's handle is never mistaken for a raw broker transaction id.
    pub proxy_transaction_id: String,
    pub broker_name: String,
    /// The id the broker itself assigned this half-message.
    pub broker_transaction_id: String,
    /// `commitLogOffset` from the half-message's send response —
    /// identifies the physical message record `endTransaction` resolves.
    pub commit_log_offset: i64,
    pub queue_offset: i64,
}

impl TransactionId {
    const SEP: char = '\u{1}';

    /// Encodes `proxyTransactionId\u{1}brokerName\u{1}brokerTransactionId\u{1}
    /// commitLogOffset\u{1}queueOffset` for the wire-facing transaction id
    /// field, the same opaque-to-the-client approach
    /// [`crate::receipt::ReceiptHandle`] uses for receipt handles: the
    /// client passes it back unchanged on `endTransaction`, and the proxy
    /// needs every field back out without a second round trip to the
    /// broker.
    pub fn encode(&self) -> String {
        [
            self.proxy_transaction_id.as_str(),
            self.broker_name.as_str(),
            self.broker_transaction_id.as_str(),
            &self.commit_log_offset.to_string(),
            &self.queue_offset.to_string(),
        ]
        .join(&Self::SEP.to_string())
    }

    pub fn decode(raw: &str) -> Result<Self, ProxyError> {
        let fields: Vec<&str> = raw.split(Self::SEP).collect();
        let [proxy_transaction_id, broker_name, broker_transaction_id, commit_log_offset, queue_offset] = fields[..]
        else {
            return Err(ProxyError::client_input(format!(
                "malformed transaction id: expected 5 fields, got {}",
                fields.len()
            )));
        };
        let parse_i64 = |s: &str| -> Result<i64, ProxyError> {
            s.parse()
                .map_err(|_| ProxyError::client_input(format!("malformed transaction id field: {s}")))
        };
        Ok(Self {
            proxy_transaction_id: proxy_transaction_id.to_string(),
            broker_name: broker_name.to_string(),
            broker_transaction_id: broker_transaction_id.to_string(),
            commit_log_offset: parse_i64(commit_log_offset)?,
            queue_offset: parse_i64(queue_offset)?,
        })
    }
}

/// The set of broker clusters a producer group has ever sent a
/// half-message through, maintained by [`crate::tx_heartbeat`] so the
/// heartbeat loop knows which clusters to notify when the group still has
/// open transactions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProducerGroupClusterSet {
    pub producer_group: String,
    pub clusters: std::collections::HashSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perm_bits() {
        assert!(Perm::READ_WRITE.can_read());
        assert!(Perm::READ_WRITE.can_write());
        assert!(Perm::READ.can_read());
        assert!(!Perm::READ.can_write());
        assert!(Perm::WRITE.can_write());
        assert!(!Perm::WRITE.can_read());
        assert!(!Perm::NONE.can_read());
        assert!(!Perm::NONE.can_write());
    }

    #[test]
    fn topic_route_empty_when_either_side_missing() {
        let mut route = TopicRoute::default();
        assert!(route.is_empty());
        route.queue_datas.push(QueueData {
            broker_name: "b1".into(),
            read_queue_nums: 4,
            write_queue_nums: 4,
            perm: Perm::READ_WRITE,
        });
        assert!(route.is_empty());
        route.broker_datas.push(BrokerData {
            cluster: "DefaultCluster".into(),
            broker_name: "b1".into(),
            broker_addrs: HashMap::from([(0, "10.0.0.1:10911".into())]),
        });
        assert!(!route.is_empty());
    }

    #[test]
    fn assignment_queue_id_is_negative_one() {
        let mq = SelectableMessageQueue {
            topic: "t".into(),
            broker_name: "b1".into(),
            queue_id: -1,
        };
        assert!(mq.is_assignment());
    }

    #[test]
    fn transaction_id_round_trips_every_field() {
        let id = TransactionId {
            proxy_transaction_id: "proxy-abc".into(),
            broker_name: "broker-a".into(),
            broker_transaction_id: "broker-xyz".into(),
            commit_log_offset: 123_456,
            queue_offset: 42,
        };
        assert_eq!(TransactionId::decode(&id.encode()).unwrap(), id);
    }

    #[test]
    fn transaction_id_rejects_wrong_field_count() {
        assert!(TransactionId::decode("a\u{1}b\u{1}c").is_err());
    }
}
