//! Relay message normalized from upstream payloads.
//!
//! The upstream feed decides the payload shape, so parsing here never
//! trusts a field's type: numbers may arrive as JSON numbers or as numeric
//! strings (protobuf `int64` values render as strings in JSON), and any
//! field that cannot be read maps to `None`. Only the symbol is required.

use serde::Serialize;
use serde_json::{Map, Value};

use super::symbol::Symbol;

/// A normalized quote update delivered to downstream clients.
///
/// Serialized without a `type` tag; absent values render as `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayMessage {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Last price.
    pub price: Option<f64>,
    /// Absolute change from previous close.
    pub change: Option<f64>,
    /// Percent change from previous close.
    pub change_percent: Option<f64>,
    /// Day volume.
    pub volume: Option<i64>,
    /// Quote time in epoch milliseconds.
    pub timestamp: Option<i64>,
}

impl RelayMessage {
    /// Create a message carrying only a symbol.
    #[must_use]
    pub const fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            price: None,
            change: None,
            change_percent: None,
            volume: None,
            timestamp: None,
        }
    }

    /// Parse an upstream payload.
    ///
    /// The symbol is read from `id` (falling back to `symbol`), volume from
    /// `day_volume` (falling back to `volume`) and the timestamp from `time`
    /// (falling back to `timestamp`).
    ///
    /// # Errors
    ///
    /// Returns `MessageError` if the payload is not an object or carries no
    /// usable symbol.
    pub fn from_upstream(payload: &Value) -> Result<Self, MessageError> {
        let Value::Object(fields) = payload else {
            return Err(MessageError::NotAnObject);
        };

        let raw_symbol = first_present(fields, &["id", "symbol"]).ok_or(MessageError::MissingSymbol)?;
        let Value::String(raw_symbol) = raw_symbol else {
            return Err(MessageError::InvalidSymbol(raw_symbol.to_string()));
        };
        let symbol = Symbol::parse(raw_symbol)
            .map_err(|_| MessageError::InvalidSymbol(raw_symbol.clone()))?;

        Ok(Self {
            symbol,
            price: fields.get("price").and_then(as_f64),
            change: fields.get("change").and_then(as_f64),
            change_percent: fields.get("change_percent").and_then(as_f64),
            volume: first_present(fields, &["day_volume", "volume"]).and_then(as_i64),
            timestamp: first_present(fields, &["time", "timestamp"]).and_then(as_i64),
        })
    }
}

/// Reasons an upstream payload is dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// Payload is not a JSON object.
    #[error("payload is not an object")]
    NotAnObject,
    /// No `id`/`symbol` field.
    #[error("payload has no symbol")]
    MissingSymbol,
    /// Symbol field is not a usable string.
    #[error("payload symbol {0} is invalid")]
    InvalidSymbol(String),
}

fn first_present<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| fields.get(*key).filter(|v| !v.is_null()))
}

fn as_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(float_to_i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(float_to_i64))
        }
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn float_to_i64(v: f64) -> Option<i64> {
    (v.is_finite() && v >= i64::MIN as f64 && v <= i64::MAX as f64).then(|| v.round() as i64)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_yahoo_shaped_payload() {
        let payload = json!({
            "id": "aapl",
            "price": 219.26,
            "time": "1754589807000",
            "change_percent": 1.25,
            "day_volume": "48213900",
            "change": 2.71,
            "exchange": "NMS"
        });

        let msg = RelayMessage::from_upstream(&payload).unwrap();

        assert_eq!(msg.symbol.as_str(), "AAPL");
        assert_eq!(msg.price, Some(219.26));
        assert_eq!(msg.change, Some(2.71));
        assert_eq!(msg.change_percent, Some(1.25));
        assert_eq!(msg.volume, Some(48_213_900));
        assert_eq!(msg.timestamp, Some(1_754_589_807_000));
    }

    #[test]
    fn falls_back_to_alternate_field_names() {
        let payload = json!({
            "symbol": "MSFT",
            "volume": 10,
            "timestamp": 123
        });

        let msg = RelayMessage::from_upstream(&payload).unwrap();

        assert_eq!(msg.symbol.as_str(), "MSFT");
        assert_eq!(msg.volume, Some(10));
        assert_eq!(msg.timestamp, Some(123));
        assert_eq!(msg.price, None);
    }

    #[test]
    fn unreadable_fields_become_none() {
        let payload = json!({
            "id": "AAPL",
            "price": "not a number",
            "change": [1, 2],
            "day_volume": {"v": 1},
            "time": true
        });

        let msg = RelayMessage::from_upstream(&payload).unwrap();

        assert_eq!(msg, RelayMessage::new(Symbol::parse("AAPL").unwrap()));
    }

    #[test]
    fn rejects_missing_symbol() {
        let payload = json!({"price": 1.0});
        assert_eq!(
            RelayMessage::from_upstream(&payload),
            Err(MessageError::MissingSymbol)
        );
    }

    #[test]
    fn rejects_empty_and_non_string_symbol() {
        assert!(matches!(
            RelayMessage::from_upstream(&json!({"id": ""})),
            Err(MessageError::InvalidSymbol(_))
        ));
        assert!(matches!(
            RelayMessage::from_upstream(&json!({"id": 42})),
            Err(MessageError::InvalidSymbol(_))
        ));
    }

    #[test]
    fn rejects_non_object() {
        assert_eq!(
            RelayMessage::from_upstream(&json!([1, 2, 3])),
            Err(MessageError::NotAnObject)
        );
    }

    #[test]
    fn serializes_absent_fields_as_null() {
        let msg = RelayMessage {
            price: Some(150.25),
            ..RelayMessage::new(Symbol::parse("AAPL").unwrap())
        };

        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(
            value,
            json!({
                "symbol": "AAPL",
                "price": 150.25,
                "change": null,
                "change_percent": null,
                "volume": null,
                "timestamp": null
            })
        );
    }
}
