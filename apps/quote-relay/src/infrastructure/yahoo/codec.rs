//! Yahoo Streamer Codec
//!
//! Encodes subscription frames and decodes pushed pricing frames.
//!
//! # Wire Format
//!
//! Outbound frames are JSON:
//!
//! ```json
//! {"subscribe":["AAPL","BTC-USD"]}
//! {"unsubscribe":["AAPL"]}
//! ```
//!
//! Inbound frames wrap a base64-encoded `PricingData` protobuf:
//!
//! ```json
//! {"type":"pricing","message":"CgRBQVBMFexHW0M..."}
//! ```
//!
//! A bare base64 string (the v1 framing) and an already-decoded JSON
//! object carrying an `id` are accepted too.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use prost::Message as _;
use serde_json::{Map, Number, Value, json};

use super::pricing::PricingData;
use crate::domain::streaming::Symbol;

/// Codec errors. All of them concern a single frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload is not valid base64.
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The payload is not a valid `PricingData` message.
    #[error("protobuf decode error: {0}")]
    Protobuf(#[from] prost::DecodeError),

    /// The frame has no recognizable shape.
    #[error("unrecognized frame: {0}")]
    UnrecognizedFrame(String),
}

/// Codec for the Yahoo streamer.
#[derive(Debug, Default, Clone, Copy)]
pub struct YahooCodec;

impl YahooCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode a subscribe frame.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode_subscribe(&self, symbols: &[Symbol]) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&json!({ "subscribe": symbols }))?)
    }

    /// Encode an unsubscribe frame.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode_unsubscribe(&self, symbols: &[Symbol]) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&json!({ "unsubscribe": symbols }))?)
    }

    /// Decode a text frame into the JSON payload the relay parses.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a pricing envelope, a base64
    /// pricing message, or a JSON object with an `id`.
    pub fn decode(&self, text: &str) -> Result<Value, CodecError> {
        let trimmed = text.trim();

        if !trimmed.starts_with('{') {
            return Ok(self.decode_pricing(trimmed)?.to_payload());
        }

        let frame: Value = serde_json::from_str(trimmed)?;

        if let Some(encoded) = frame.get("message").and_then(Value::as_str) {
            return Ok(self.decode_pricing(encoded)?.to_payload());
        }

        if frame.get("id").is_some_and(Value::is_string) {
            return Ok(frame);
        }

        Err(CodecError::UnrecognizedFrame(
            trimmed.chars().take(50).collect(),
        ))
    }

    /// Decode a base64 `PricingData` message.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not base64 or not a valid message.
    pub fn decode_pricing(&self, encoded: &str) -> Result<PricingData, CodecError> {
        let bytes = BASE64.decode(encoded)?;
        Ok(PricingData::decode(bytes.as_slice())?)
    }
}

impl PricingData {
    /// Render as a JSON object, omitting fields left at their default.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        let mut fields = Map::new();

        put_str(&mut fields, "id", &self.id);
        put_f32(&mut fields, "price", self.price);
        put_i64(&mut fields, "time", self.time);
        put_str(&mut fields, "currency", &self.currency);
        put_str(&mut fields, "exchange", &self.exchange);
        put_i64(&mut fields, "quote_type", self.quote_type.into());
        put_i64(&mut fields, "market_hours", self.market_hours.into());
        put_f32(&mut fields, "change_percent", self.change_percent);
        put_i64(&mut fields, "day_volume", self.day_volume);
        put_f32(&mut fields, "day_high", self.day_high);
        put_f32(&mut fields, "day_low", self.day_low);
        put_f32(&mut fields, "change", self.change);
        put_str(&mut fields, "short_name", &self.short_name);
        put_f32(&mut fields, "open_price", self.open_price);
        put_f32(&mut fields, "previous_close", self.previous_close);

        Value::Object(fields)
    }
}

fn put_str(fields: &mut Map<String, Value>, key: &str, value: &str) {
    if !value.is_empty() {
        fields.insert(key.to_string(), Value::String(value.to_string()));
    }
}

fn put_i64(fields: &mut Map<String, Value>, key: &str, value: i64) {
    if value != 0 {
        fields.insert(key.to_string(), Value::from(value));
    }
}

fn put_f32(fields: &mut Map<String, Value>, key: &str, value: f32) {
    if value == 0.0 {
        return;
    }
    // widen through the shortest decimal form so 219.26f32 stays 219.26
    let widened = value.to_string().parse::<f64>().unwrap_or_else(|_| f64::from(value));
    if let Some(number) = Number::from_f64(widened) {
        fields.insert(key.to_string(), Value::Number(number));
    }
}
