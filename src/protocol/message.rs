//! Request and response frame definitions

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::{DEADLINE_META_KEY, FIXED_HEADER_SIZE, ONEWAY_META_KEY, PROTOCOL_VERSION};

/// Process-wide message id counter. Starts at zero, is only ever incremented.
static NEXT_MESSAGE_ID: AtomicU32 = AtomicU32::new(0);

/// Allocate the next message id (the first id handed out is 1)
pub fn next_message_id() -> u32 {
    NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
}

/// Lengths past `u32::MAX` saturate; encoding then rejects the frame
fn length_field(length: usize) -> u32 {
    u32::try_from(length).unwrap_or(u32::MAX)
}

/// A call sent from client to server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    /// Encoded header length, see [`Request::calculate_header_length`]
    pub header_length: u32,
    /// Encoded body length, see [`Request::calculate_body_length`]
    pub body_length: u32,
    /// Client-side correlation id
    pub message_id: u32,
    /// Protocol version
    pub version: u8,
    /// Code of the compressor applied to `data`
    pub compressor: u8,
    /// Code of the serializer that produced `data`
    pub serializer: u8,
    pub service_name: String,
    pub method_name: String,
    /// Free-form metadata (oneway marker, deadline, ...)
    pub meta: HashMap<String, String>,
    /// Serialized and compressed argument
    pub data: Bytes,
}

impl Request {
    pub fn new(service_name: impl Into<String>, method_name: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            service_name: service_name.into(),
            method_name: method_name.into(),
            ..Default::default()
        }
    }

    /// Header length implied by the current field values
    pub fn expected_header_length(&self) -> usize {
        let mut length = FIXED_HEADER_SIZE + self.service_name.len() + 1 + self.method_name.len() + 1;
        for (key, value) in &self.meta {
            // key, '\r', value, '\n'
            length += key.len() + 1 + value.len() + 1;
        }
        length
    }

    pub fn calculate_header_length(&mut self) {
        self.header_length = length_field(self.expected_header_length());
    }

    pub fn calculate_body_length(&mut self) {
        self.body_length = length_field(self.data.len());
    }

    /// Recompute both derived lengths; required before encoding
    pub fn refresh_lengths(&mut self) {
        self.calculate_header_length();
        self.calculate_body_length();
    }

    /// Whether the caller asked not to receive a response
    pub fn is_oneway(&self) -> bool {
        self.meta.get(ONEWAY_META_KEY).map(String::as_str) == Some("true")
    }

    pub fn set_oneway(&mut self) {
        self.meta.insert(ONEWAY_META_KEY.to_string(), "true".to_string());
    }

    /// Deadline carried in the metadata, if present and well-formed
    pub fn deadline(&self) -> Option<SystemTime> {
        let millis: u64 = self.meta.get(DEADLINE_META_KEY)?.parse().ok()?;
        Some(UNIX_EPOCH + Duration::from_millis(millis))
    }

    /// Store a deadline as Unix milliseconds (sub-millisecond precision is dropped)
    pub fn set_deadline(&mut self, deadline: SystemTime) {
        let millis = deadline
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        self.meta
            .insert(DEADLINE_META_KEY.to_string(), millis.to_string());
    }
}

/// The answer to a [`Request`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    pub header_length: u32,
    pub body_length: u32,
    pub message_id: u32,
    pub version: u8,
    pub compressor: u8,
    pub serializer: u8,
    /// Empty on success, otherwise a UTF-8 error message
    pub error: Bytes,
    /// Serialized and compressed result
    pub data: Bytes,
}

impl Response {
    /// An empty response echoing the codes and id of `request`
    pub fn reply_to(request: &Request) -> Self {
        Self {
            message_id: request.message_id,
            version: request.version,
            compressor: request.compressor,
            serializer: request.serializer,
            ..Default::default()
        }
    }

    pub fn expected_header_length(&self) -> usize {
        FIXED_HEADER_SIZE + self.error.len()
    }

    pub fn calculate_header_length(&mut self) {
        self.header_length = length_field(self.expected_header_length());
    }

    pub fn calculate_body_length(&mut self) {
        self.body_length = length_field(self.data.len());
    }

    pub fn refresh_lengths(&mut self) {
        self.calculate_header_length();
        self.calculate_body_length();
    }

    /// Replace the payload with an error message
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Bytes::from(message.into());
        self.data = Bytes::new();
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// The error message, if the call failed
    pub fn error_message(&self) -> Option<String> {
        if self.error.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.error).into_owned())
        }
    }
}
