//! Canonical internal request/response types shared by the v1 and v2 RPC
//! surfaces (spec §6, §9).
//!
//! The v1 and v2 proto message shapes differ (v2 folds
//! `ChangeInvisibleDuration`/`ForwardMessageToDeadLetterQueue` into what v1
//! expresses through `NackMessage`), but both ultimately drive the same
//! engine operations. Per-version activities in `proxy-server` translate
//! proto <-> these types; nothing in `proxy-core` branches on protocol
//! version.

use crate::model::SelectableMessageQueue;
use crate::remoting::MessageBody;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub queue: SelectableMessageQueue,
    pub producer_group: String,
    pub messages: Vec<MessageBody>,
    pub properties: std::collections::HashMap<String, String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SendMessageResult {
    pub msg_ids: Vec<String>,
    pub queue_id: i32,
    pub queue_offset: i64,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReceiveMessageRequest {
    pub group: String,
    pub topic: String,
    pub max_messages: i32,
    pub invisible_duration: Duration,
    pub poll_timeout: Duration,
    pub init_mode: i32,
    /// Raw tag/SQL filter expression; empty means no filtering.
    pub subscription_expression: String,
    pub fifo: bool,
    pub call_deadline: Duration,
}

#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub body: MessageBody,
    pub receipt_handle: String,
    pub reconsume_times: i32,
}

#[derive(Debug, Clone, Default)]
pub struct ReceiveMessageResult {
    pub messages: Vec<ReceivedMessage>,
    pub throttled: bool,
}

#[derive(Debug, Clone)]
pub struct AckMessageRequest {
    pub topic: String,
    pub consumer_group: String,
    pub receipt_handle: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct NackMessageRequest {
    pub topic: String,
    pub consumer_group: String,
    pub receipt_handle: String,
    pub delivery_attempt: u32,
    pub max_delivery_attempts: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ChangeInvisibleDurationRequest {
    pub topic: String,
    pub consumer_group: String,
    pub receipt_handle: String,
    pub invisible_duration: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ChangeInvisibleDurationResult {
    pub new_receipt_handle: String,
}

#[derive(Debug, Clone)]
pub struct EndTransactionRequest {
    pub producer_group: String,
    pub topic: String,
    pub msg_id: String,
    pub transaction_id: Option<String>,
    /// Decoded from the client's `TransactionId` handle; identifies the
    /// exact half-message the broker should resolve.
    pub commit_log_offset: i64,
    pub queue_offset: i64,
    pub commit: bool,
    pub from_transaction_check: bool,
}

#[derive(Debug, Clone)]
pub struct QueryRouteRequest {
    pub topic: String,
    /// The client-facing endpoint this request arrived at, used to pick
    /// the advertised broker address in cluster mode (spec §4.10). A
    /// missing/default endpoint in cluster mode is a `ClientInput` error.
    pub endpoints: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QueryAssignmentRequest {
    pub topic: String,
    pub consumer_group: String,
    pub endpoints: Option<String>,
}
