//! Yahoo streamer `PricingData` protobuf message.
//!
//! Field numbers follow the streamer's `pricing.proto`. Only the fields the
//! relay can use are declared; prost skips unknown tags.

/// One pricing update pushed by the streamer.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PricingData {
    /// Instrument symbol.
    #[prost(string, tag = "1")]
    pub id: String,
    /// Last price.
    #[prost(float, tag = "2")]
    pub price: f32,
    /// Quote time in epoch milliseconds.
    #[prost(sint64, tag = "3")]
    pub time: i64,
    /// Quote currency.
    #[prost(string, tag = "4")]
    pub currency: String,
    /// Exchange code.
    #[prost(string, tag = "5")]
    pub exchange: String,
    /// Instrument class (equity, index, crypto, ...).
    #[prost(int32, tag = "6")]
    pub quote_type: i32,
    /// Trading session (pre, regular, post, ...).
    #[prost(int32, tag = "7")]
    pub market_hours: i32,
    /// Percent change from previous close.
    #[prost(float, tag = "8")]
    pub change_percent: f32,
    /// Day volume.
    #[prost(sint64, tag = "9")]
    pub day_volume: i64,
    /// Day high.
    #[prost(float, tag = "10")]
    pub day_high: f32,
    /// Day low.
    #[prost(float, tag = "11")]
    pub day_low: f32,
    /// Absolute change from previous close.
    #[prost(float, tag = "12")]
    pub change: f32,
    /// Display name.
    #[prost(string, tag = "13")]
    pub short_name: String,
    /// Session open.
    #[prost(float, tag = "15")]
    pub open_price: f32,
    /// Previous close.
    #[prost(float, tag = "16")]
    pub previous_close: f32,
}
