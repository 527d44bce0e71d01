//! Minimal request/response header shapes for the broker wire codes this
//! proxy issues (spec §6: `SEND_MESSAGE(_V2/_BATCH)`, `POP_MESSAGE`,
//! `ACK_MESSAGE`, `CHANGE_INVISIBLE_TIME`, `CONSUMER_SEND_MSG_BACK`,
//! `END_TRANSACTION`, `HEART_BEAT`, `GET_CONSUMER_LIST_BY_GROUP`,
//! `GET_MAX_OFFSET`, `SEARCH_OFFSET_BY_TIMESTAMP`, `PULL_MESSAGE`,
//! `UPDATE_CONSUMER_OFFSET`) and the three back-request codes.
//!
//! The framed `RemotingCommand{code, version, opaque, flag, remark,
//! extFields, customHeader, body}` codec and its TCP transport are
//! explicitly out of scope (spec §1) — these are the plain Rust shapes
//! [`crate::transport::ClusterTransport`] marshals into/out of whatever
//! codec implementation actually owns the wire, via [`crate::transport::BrokerTransport`].

use std::collections::HashMap;

/// One message body as it travels to/from the broker: opaque payload plus
/// the property map (tags, keys, `POP_CK`, etc.) carried alongside it.
#[derive(Debug, Clone, Default)]
pub struct MessageBody {
    pub payload: Vec<u8>,
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct SendMessageRequestHeader {
    pub producer_group: String,
    pub topic: String,
    pub queue_id: i32,
    pub sys_flag: i32,
    pub born_timestamp: i64,
    pub flag: i32,
    pub properties: String,
    pub reconsume_times: i32,
    pub batch: bool,
}

#[derive(Debug, Clone)]
pub struct SendMessageResponseHeader {
    pub msg_id: String,
    pub queue_id: i32,
    pub queue_offset: i64,
    pub transaction_id: Option<String>,
    /// Physical commit-log position of the half-message this send
    /// prepared; only meaningful when `transaction_id` is `Some`, and
    /// needed to resolve the exact message on `endTransaction`.
    pub commit_log_offset: i64,
}

#[derive(Debug, Clone)]
pub struct PopMessageRequestHeader {
    pub consumer_group: String,
    pub topic: String,
    pub queue_id: i32,
    pub max_msg_nums: i32,
    pub invisible_time: i64,
    pub poll_time: i64,
    pub born_time: i64,
    pub init_mode: i32,
    pub exp_type: String,
    pub exp: String,
    pub order: bool,
}

/// `PopStatus` mirrors the broker's pop response codes (spec §4.5, step 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopStatus {
    Found,
    NoNewMsg,
    PollingFull,
    PollingNotFound,
}

#[derive(Debug, Clone)]
pub struct PopMessageResponseHeader {
    pub status: PopStatus,
    pub pop_time: i64,
    pub invisible_time: i64,
    pub revive_qid: i32,
    pub rest_num: i64,
    /// Raw `startOffsetInfo` header string, parsed by [`crate::receipt`].
    pub start_offset_info: String,
    /// Raw `msgOffsetInfo` header string.
    pub msg_offset_info: String,
    /// Raw `orderCountInfo` header string (FIFO subscriptions only).
    pub order_count_info: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AckMessageRequestHeader {
    pub consumer_group: String,
    pub topic: String,
    pub queue_id: i32,
    pub extra_info: String,
    pub offset: i64,
}

/// The broker's ack outcome; anything other than `Ok` is surfaced as a
/// generic `ProxyErrorKind::Internal` per spec §9's recorded decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone)]
pub struct ChangeInvisibleTimeRequestHeader {
    pub consumer_group: String,
    pub topic: String,
    pub queue_id: i32,
    pub extra_info: String,
    pub invisible_time: i64,
}

#[derive(Debug, Clone)]
pub struct ChangeInvisibleTimeResponseHeader {
    /// The broker issues a fresh handle the moment it accepts the change;
    /// the old one is invalid from that instant (spec §4.5).
    pub extra_info: String,
}

#[derive(Debug, Clone)]
pub struct ConsumerSendMsgBackRequestHeader {
    pub group: String,
    pub offset: i64,
    pub delay_level: i32,
    pub origin_msg_id: String,
    pub origin_topic: String,
    pub max_reconsume_times: i32,
}

#[derive(Debug, Clone)]
pub struct EndTransactionRequestHeader {
    pub producer_group: String,
    pub tran_state_table_offset: i64,
    pub commit_log_offset: i64,
    pub commit: bool,
    pub from_transaction_check: bool,
    pub msg_id: String,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatData {
    pub client_id: String,
    pub producer_data_set: Vec<String>,
    pub consumer_data_set: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GetMaxOffsetRequestHeader {
    pub topic: String,
    pub queue_id: i32,
}

#[derive(Debug, Clone)]
pub struct SearchOffsetRequestHeader {
    pub topic: String,
    pub queue_id: i32,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct PullMessageRequestHeader {
    pub consumer_group: String,
    pub topic: String,
    pub queue_id: i32,
    pub queue_offset: i64,
    pub max_msg_nums: i32,
    pub sys_flag: i32,
    pub commit_offset: i64,
    pub suspend_timeout_millis: i64,
    pub subscription: String,
    pub sub_version: i64,
}

/// The three broker-originated back-request codes relayed through
/// [`crate::relay`].
#[derive(Debug, Clone)]
pub enum BackRequestBody {
    CheckTransactionState {
        msg_id: String,
        transaction_id: Option<String>,
        tran_state_table_offset: i64,
        commit_log_offset: i64,
    },
    GetConsumerRunningInfo {
        consumer_group: String,
        client_id: String,
    },
    ConsumeMessageDirectly {
        consumer_group: String,
        client_id: String,
        msg_id: String,
    },
}
