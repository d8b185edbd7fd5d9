//! Canonical tracking model shared by every carrier integration

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Decoded carrier payload.
///
/// XML bodies are folded into the same nested mapping shape JSON bodies already have, so
/// every normalizer walks a `serde_json::Value` regardless of the wire format.
pub type RawCarrierResponse = serde_json::Value;

/// How much activity a carrier should return for one tracking number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityScope {
    /// Only the most recent event
    Latest,
    /// Every event the carrier still holds
    Full,
}

/// Canonical snapshot of the most recent event for a tracked item.
///
/// A carrier-reported error (unknown tracking number and the like) is also a snapshot:
/// `carrier_error` is set, `delivered` is false and the carrier's text is the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryVitals {
    /// Whether the message matched one of the carrier's delivered phrases.
    pub delivered: bool,
    /// ASCII-only event description, or the carrier's error text.
    pub message: String,
    /// When the event happened, in the carrier's local wall-clock time.
    pub timestamp: Option<NaiveDateTime>,
    /// Space-joined location of the event, when the carrier reported one.
    pub location: Option<String>,
    /// Set when the payload was an explicit carrier error rather than an event.
    #[serde(default)]
    pub carrier_error: bool,
}

impl DeliveryVitals {
    /// Build the negative snapshot for an explicit carrier error payload.
    pub fn carrier_error(message: impl Into<String>) -> Self {
        Self {
            delivered: false,
            message: message.into(),
            timestamp: None,
            location: None,
            carrier_error: true,
        }
    }

    /// Build the snapshot for a normal event.
    pub fn from_event(event: DeliveryEvent, delivered: bool) -> Self {
        Self {
            delivered,
            message: event.message,
            timestamp: event.timestamp,
            location: event.location,
            carrier_error: false,
        }
    }

    /// Message as persisted: the event text followed by its location, when known.
    pub fn display_message(&self) -> String {
        match self.location.as_deref() {
            Some(location) if !location.is_empty() => format!("{} at {}", self.message, location),
            _ => self.message.clone(),
        }
    }
}

/// One event in an item's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryEvent {
    pub message: String,
    pub location: Option<String>,
    pub timestamp: Option<NaiveDateTime>,
}

impl From<&DeliveryVitals> for DeliveryEvent {
    fn from(vitals: &DeliveryVitals) -> Self {
        Self {
            message: vitals.message.clone(),
            location: vitals.location.clone(),
            timestamp: vitals.timestamp,
        }
    }
}

/// Events ordered oldest first; the last element is the current status.
pub type History = Vec<DeliveryEvent>;

/// Error types for carrier requests and payload decoding
#[derive(Debug, thiserror::Error)]
pub enum CarrierError {
    /// Timeout, connection reset, DNS failure. Safe to retry.
    #[error("Transient network error: {0}")]
    Transient(String),

    /// Undecodable body or a payload missing the fields a normalizer needs.
    #[error("Bad response: {0}")]
    BadResponse(String),

    #[error("Authentication error: {0}")]
    Auth(String),
}

impl CarrierError {
    /// Whether the failure is a network fault worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, CarrierError::Transient(_))
    }

    pub fn bad_response(message: impl Into<String>) -> Self {
        CarrierError::BadResponse(message.into())
    }
}

/// Whether a decode failure came from the payload itself rather than from reading the body.
fn is_payload_decode(err: &reqwest::Error) -> bool {
    use std::error::Error;

    let mut source = err.source();
    while let Some(cause) = source {
        if cause.is::<std::io::Error>() {
            return false;
        }
        if cause.is::<serde_json::Error>() {
            return true;
        }
        source = cause.source();
    }
    // Text decoding is lossy, so a decode error without a JSON cause is a failed body read.
    false
}

impl From<reqwest::Error> for CarrierError {
    fn from(err: reqwest::Error) -> Self {
        let transient = err.is_timeout()
            || err.is_connect()
            || err.is_request()
            || err.is_body()
            || (err.is_decode() && !is_payload_decode(&err));
        if transient {
            CarrierError::Transient(err.to_string())
        } else {
            CarrierError::BadResponse(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CarrierError {
    fn from(err: serde_json::Error) -> Self {
        CarrierError::BadResponse(format!("JSON parse error: {}", err))
    }
}

impl From<quick_xml::Error> for CarrierError {
    fn from(err: quick_xml::Error) -> Self {
        CarrierError::BadResponse(format!("XML parse error: {}", err))
    }
}
