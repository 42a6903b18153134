use crate::utils::domain_of;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest sanitised sender kept in an id, so file names stay well under
/// the usual 255-byte limit.
const MAX_SENDER_IN_ID: usize = 64;

/// A message accepted by the session engine and waiting for delivery.
///
/// `content` is the exact DATA payload (CRLF line endings, no dot-stuffing,
/// no terminating `.` line); escaping happens only on the wire. It is kept
/// as raw bytes and stored base64-encoded, so 8-bit bodies survive intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: String,
    pub from: String,
    pub to: Vec<String>,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
}

impl QueuedMessage {
    /// Build a fresh message, due immediately. The id is assigned by the store.
    pub fn new(from: impl Into<String>, to: Vec<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            id: String::new(),
            from: from.into(),
            to,
            content: content.into(),
            attempts: 0,
            last_error: None,
            next_attempt_at: Utc::now(),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at <= now
    }

    /// Domain used for MX routing. Only the first recipient is considered.
    pub fn routing_domain(&self) -> Option<&str> {
        self.to.first().and_then(|rcpt| domain_of(rcpt))
    }

    /// Record a failed attempt: linear backoff of `step` per attempt made.
    /// A delay past the representable range parks the message at the far end.
    pub fn record_failure(&mut self, error: impl Into<String>, now: DateTime<Utc>, step: Duration) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.into());

        let next = i32::try_from(self.attempts)
            .ok()
            .and_then(|attempts| step.checked_mul(attempts))
            .and_then(|delay| now.checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        if next > self.next_attempt_at {
            self.next_attempt_at = next;
        }
    }
}

/// Unique record id: submission time, sanitised sender, random suffix.
pub fn generate_id(from: &str, now: DateTime<Utc>) -> String {
    let nanos = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1000));

    let sender: String = from
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_SENDER_IN_ID)
        .collect();

    let suffix = Uuid::new_v4().simple().to_string();

    format!("{}-{}-{}", nanos, sender, &suffix[..8])
}

/// Ids double as file names, so only a conservative alphabet is accepted.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(D::Error::custom)
    }
}
