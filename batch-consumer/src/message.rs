use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rdkafka::message::{BorrowedMessage, Headers, Message, OwnedHeaders};

use crate::types::Partition;

/// An owned copy of a message as delivered by the stream. Payload decoding
/// happens separately, so a message whose payload is malformed is still a
/// valid `RawMessage`.
#[derive(Debug, Clone)]
pub struct RawMessage {
    partition: Partition,
    offset: i64,
    key: Option<Vec<u8>>,
    payload: Option<Vec<u8>>,
    timestamp: Option<SystemTime>,
    headers: Option<OwnedHeaders>,
}

impl RawMessage {
    pub fn new(partition: Partition, offset: i64, payload: Option<Vec<u8>>) -> Self {
        Self {
            partition,
            offset,
            key: None,
            payload,
            timestamp: None,
            headers: None,
        }
    }

    pub fn with_key(mut self, key: Vec<u8>) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_headers(mut self, headers: OwnedHeaders) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Copy a message out of an rdkafka queue
    pub fn from_borrowed_message(msg: &BorrowedMessage<'_>) -> Self {
        // convert from rdkafka's timestamp to common Rust form
        let timestamp = msg
            .timestamp()
            .to_millis()
            .filter(|ms| *ms >= 0)
            .map(|ms| UNIX_EPOCH + Duration::from_millis(ms as u64));

        Self {
            partition: Partition::new(msg.topic(), msg.partition()),
            offset: msg.offset(),
            key: msg.key().map(|k| k.to_vec()),
            payload: msg.payload().map(|p| p.to_vec()),
            timestamp,
            headers: msg.headers().map(|h| h.detach()),
        }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn topic(&self) -> &str {
        self.partition.topic()
    }

    pub fn partition_number(&self) -> i32 {
        self.partition.partition_number()
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    /// Get the message key as a UTF-8 string if possible
    pub fn key_as_str(&self) -> Option<Result<&str, std::str::Utf8Error>> {
        self.key.as_deref().map(std::str::from_utf8)
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }

    pub fn headers(&self) -> Option<&OwnedHeaders> {
        self.headers.as_ref()
    }

    /// Look up the first header with the given key
    pub fn header(&self, key: &str) -> Option<&[u8]> {
        self.headers
            .as_ref()?
            .iter()
            .find(|h| h.key == key)
            .and_then(|h| h.value)
    }
}
