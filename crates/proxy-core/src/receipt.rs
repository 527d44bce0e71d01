//! Receipt-handle encoding and decoding (spec §3, "Entity — ReceiptHandle").
//!
//! A receipt handle is opaque to the outer client but internally a parsed
//! record built from the broker's pop reply. It is consumed exactly once
//! by a terminal operation (ack / forward-to-DLQ / final nack), or expires
//! implicitly on the broker side at `popTime + invisibleTime`.

use crate::error::ProxyError;

/// The reserved separator used between fields, matching the broker's own
/// `extraInfo` encoding so a handle round-trips unchanged through a
/// client that treats it as opaque.
const SEP: char = '\u{1}';

/// A decoded receipt handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptHandle {
    pub start_offset: i64,
    pub pop_time: i64,
    pub invisible_time: i64,
    pub revive_qid: i32,
    pub topic: String,
    pub broker_name: String,
    pub queue_id: i32,
    /// Present only for handles synthesized from a single-message pop
    /// reply that also reports the queue offset.
    pub queue_offset: Option<i64>,
}

impl ReceiptHandle {
    /// Builds the `extraInfo` string: `startOffset⎵popTime⎵invisibleTime⎵
    /// reviveQid⎵topic⎵brokerName⎵queueId[⎵queueOffset]`.
    pub fn encode(&self) -> String {
        let mut fields = vec![
            self.start_offset.to_string(),
            self.pop_time.to_string(),
            self.invisible_time.to_string(),
            self.revive_qid.to_string(),
            self.topic.clone(),
            self.broker_name.clone(),
            self.queue_id.to_string(),
        ];
        if let Some(offset) = self.queue_offset {
            fields.push(offset.to_string());
        }
        fields.join(&SEP.to_string())
    }

    /// Parses a handle previously produced by [`Self::encode`].
    pub fn decode(raw: &str) -> Result<Self, ProxyError> {
        let fields: Vec<&str> = raw.split(SEP).collect();
        if fields.len() != 7 && fields.len() != 8 {
            return Err(ProxyError::client_input(format!(
                "malformed receipt handle: expected 7 or 8 fields, got {}",
                fields.len()
            )));
        }

        let parse_i64 = |s: &str| -> Result<i64, ProxyError> {
            s.parse()
                .map_err(|_| ProxyError::client_input(format!("malformed receipt handle field: {s}")))
        };
        let parse_i32 = |s: &str| -> Result<i32, ProxyError> {
            s.parse()
                .map_err(|_| ProxyError::client_input(format!("malformed receipt handle field: {s}")))
        };

        Ok(Self {
            start_offset: parse_i64(fields[0])?,
            pop_time: parse_i64(fields[1])?,
            invisible_time: parse_i64(fields[2])?,
            revive_qid: parse_i32(fields[3])?,
            topic: fields[4].to_string(),
            broker_name: fields[5].to_string(),
            queue_id: parse_i32(fields[6])?,
            queue_offset: match fields.get(7) {
                Some(s) => Some(parse_i64(s)?),
                None => None,
            },
        })
    }
}

/// The message property name the broker reads back the encoded handle
/// from on ack/nack requests.
pub const POP_CK_PROPERTY: &str = "POP_CK";

/// Parses a `"queueId offset,queueId offset,..."` header string — the
/// broker's own `startOffsetInfo`/`msgOffsetInfo` convention — into
/// `(queueId, offset)` pairs in wire order. Unparsable segments are
/// skipped rather than failing the whole parse, matching
/// `parse_order_count_info`'s leniency in [`crate::consumer`].
pub fn parse_offset_info(raw: &str) -> Vec<(i32, i64)> {
    raw.split(',')
        .filter_map(|segment| {
            let (qid, offset) = segment.trim().split_once(' ')?;
            Some((qid.parse().ok()?, offset.parse().ok()?))
        })
        .collect()
}
