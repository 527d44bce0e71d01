//! Broker-initiated back-request relay (spec §4.8).
//!
//! Rare broker-originated commands (`CHECK_TRANSACTION_STATE`,
//! `GET_CONSUMER_RUNNING_INFO`, `CONSUME_MESSAGE_DIRECTLY`) arrive on the
//! forward connection but must be answered by a specific client. Rather
//! than faking a socket, broker->client back-requests are modeled as a
//! `(nonce -> oneshot reply channel)` table plus a `(group, clientId) ->
//! mpsc mailbox)` table: the host binary's gRPC `PollCommand` stream
//! handler drains a client's mailbox and feeds replies back in by nonce.

use crate::remoting::BackRequestBody;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// A command pushed into a client's mailbox, carrying the nonce the
/// client must echo back.
#[derive(Debug, Clone)]
pub struct RelayCommand {
    pub nonce: u64,
    pub body: BackRequestBody,
}

/// The client's answer to a previously-sent [`RelayCommand`].
#[derive(Debug, Clone)]
pub struct RelayResponse {
    pub nonce: u64,
    pub payload: RelayResponsePayload,
}

#[derive(Debug, Clone)]
pub enum RelayResponsePayload {
    TransactionState { commit: bool },
    ConsumerRunningInfo(String),
    ConsumeResult { consumed: bool },
    /// The sweeper's synthetic completion for a timed-out pending
    /// response.
    SystemBusy,
}

struct PendingRelayResponse {
    reply_tx: Option<oneshot::Sender<RelayResponsePayload>>,
    created_at: Instant,
}

enum ChannelState {
    Active,
    Expired,
}

struct ClientChannel {
    mailbox: mpsc::Sender<RelayCommand>,
    last_poll: Instant,
    state: ChannelState,
}

/// The relay channel table described in spec §4.8.
pub struct RelayChannel {
    channels: DashMap<(String, String), ClientChannel>,
    pending: DashMap<u64, PendingRelayResponse>,
    nonce_seq: std::sync::atomic::AtomicU64,
    relay_timeout: Duration,
    channel_expire: Duration,
}

impl RelayChannel {
    pub fn new(relay_timeout: Duration, channel_expire: Duration) -> Self {
        Self {
            channels: DashMap::new(),
            pending: DashMap::new(),
            nonce_seq: std::sync::atomic::AtomicU64::new(1),
            relay_timeout,
            channel_expire,
        }
    }

    /// Registers (or refreshes) a client's mailbox, returning the
    /// receiving half for the gRPC `PollCommand` stream handler to drain.
    pub fn register(&self, group: &str, client_id: &str) -> mpsc::Receiver<RelayCommand> {
        let (tx, rx) = mpsc::channel(64);
        self.channels.insert(
            (group.to_string(), client_id.to_string()),
            ClientChannel {
                mailbox: tx,
                last_poll: Instant::now(),
                state: ChannelState::Active,
            },
        );
        rx
    }

    /// Marks a channel as freshly polled, reviving it from `Expired`.
    pub fn touch(&self, group: &str, client_id: &str) {
        if let Some(mut entry) = self.channels.get_mut(&(group.to_string(), client_id.to_string())) {
            entry.last_poll = Instant::now();
            entry.state = ChannelState::Active;
        }
    }

    /// Picks a client under `group` uniformly at random, pushes the
    /// command into its mailbox, and returns a future that resolves when
    /// the client replies (or the sweeper times it out).
    pub async fn send_and_await(
        &self,
        group: &str,
        body: BackRequestBody,
    ) -> Option<oneshot::Receiver<RelayResponsePayload>> {
        let candidates: Vec<String> = self
            .channels
            .iter()
            .filter(|e| e.key().0 == group)
            .map(|e| e.key().1.clone())
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let idx = rand::random::<usize>() % candidates.len();
        let client_id = &candidates[idx];

        let mailbox = self
            .channels
            .get(&(group.to_string(), client_id.clone()))
            .map(|c| c.mailbox.clone())?;

        let nonce = self.nonce_seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(
            nonce,
            PendingRelayResponse {
                reply_tx: Some(reply_tx),
                created_at: Instant::now(),
            },
        );

        if mailbox.send(RelayCommand { nonce, body }).await.is_err() {
            self.pending.remove(&nonce);
            return None;
        }

        Some(reply_rx)
    }

    /// Fulfils a pending response by nonce; called from the gRPC handler
    /// when a client's reply arrives.
    pub fn complete(&self, response: RelayResponse) {
        if let Some((_, mut entry)) = self.pending.remove(&response.nonce) {
            if let Some(tx) = entry.reply_tx.take() {
                let _ = tx.send(response.payload);
            }
        }
    }

    /// Completes any pending response older than the relay timeout with a
    /// synthetic `SystemBusy`, and removes channels idle longer than
    /// `channelExpireSeconds`. Intended to run every 10s on a dedicated
    /// worker, per spec §4.8.
    pub fn sweep(&self) {
        let now = Instant::now();

        let stale: Vec<u64> = self
            .pending
            .iter()
            .filter(|e| now.duration_since(e.value().created_at) >= self.relay_timeout)
            .map(|e| *e.key())
            .collect();
        for nonce in stale {
            if let Some((_, mut entry)) = self.pending.remove(&nonce) {
                if let Some(tx) = entry.reply_tx.take() {
                    let _ = tx.send(RelayResponsePayload::SystemBusy);
                }
            }
        }

        for mut entry in self.channels.iter_mut() {
            if now.duration_since(entry.last_poll) >= self.channel_expire {
                entry.state = ChannelState::Expired;
            }
        }
        self.channels
            .retain(|_, c| !matches!(c.state, ChannelState::Expired));
    }

    /// Runs the sweeper on a fixed 10s cadence until `shutdown` fires.
    pub async fn run_sweeper(self: Arc<Self>, mut shutdown: crate::shutdown::ShutdownToken) {
        let mut ticker = tokio::time::interval(Duration::from_secs(10));
        loop {
            tokio::select! {
                _ = ticker.tick() => self.sweep(),
                _ = shutdown.cancelled() => {
                    tracing::info!("relay sweeper shutting down");
                    break;
                }
            }
        }
    }
}

/// Synthesizes a client id for relay registration when the caller hasn't
/// been assigned one yet (e.g. a fresh `PollCommand` stream).
pub fn generate_client_id() -> String {
    format!("rmq-proxy-relay-{}", Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_and_await_returns_none_with_no_registered_clients() {
        let relay = RelayChannel::new(Duration::from_secs(3), Duration::from_secs(120));
        let result = relay
            .send_and_await(
                "g1",
                BackRequestBody::GetConsumerRunningInfo {
                    consumer_group: "g1".into(),
                    client_id: "c1".into(),
                },
            )
            .await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn registered_client_receives_pushed_command() {
        let relay = RelayChannel::new(Duration::from_secs(3), Duration::from_secs(120));
        let mut rx = relay.register("g1", "c1");

        let reply_rx = relay
            .send_and_await(
                "g1",
                BackRequestBody::GetConsumerRunningInfo {
                    consumer_group: "g1".into(),
                    client_id: "c1".into(),
                },
            )
            .await
            .unwrap();

        let cmd = rx.recv().await.unwrap();
        relay.complete(RelayResponse {
            nonce: cmd.nonce,
            payload: RelayResponsePayload::ConsumerRunningInfo("{}".to_string()),
        });

        let response = reply_rx.await.unwrap();
        assert!(matches!(response, RelayResponsePayload::ConsumerRunningInfo(_)));
    }

    #[tokio::test]
    async fn sweep_times_out_stale_pending_responses() {
        let relay = RelayChannel::new(Duration::from_millis(1), Duration::from_secs(120));
        let _rx = relay.register("g1", "c1");

        let reply_rx = relay
            .send_and_await(
                "g1",
                BackRequestBody::CheckTransactionState {
                    msg_id: "m1".into(),
                    transaction_id: None,
                    tran_state_table_offset: 0,
                    commit_log_offset: 0,
                },
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        relay.sweep();

        let response = reply_rx.await.unwrap();
        assert!(matches!(response, RelayResponsePayload::SystemBusy));
    }

    #[tokio::test]
    async fn sweep_removes_idle_channels() {
        let relay = RelayChannel::new(Duration::from_secs(3), Duration::from_millis(1));
        let _rx = relay.register("g1", "c1");
        tokio::time::sleep(Duration::from_millis(5)).await;
        relay.sweep();
        assert!(relay.channels.is_empty());
    }
}
