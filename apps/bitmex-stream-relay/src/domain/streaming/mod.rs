//! Trade Event Types
//!
//! The canonical internal representation of one executed trade, decoded
//! from the upstream feed and delivered to subscribers. Wire-format types
//! for the feed live in `infrastructure::bitmex::messages`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::symbols::Symbol;

/// Serialized delivery frame, shared by every connection it is routed to.
pub type DeliveryFrame = Arc<str>;

/// Aggressor side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    /// Buyer-initiated trade.
    Buy,
    /// Seller-initiated trade.
    Sell,
}

/// One decoded price update for a symbol.
///
/// Serialized as the subscriber delivery frame:
///
/// ```json
/// {"symbol":"XBTUSD","price":50000.0,"timestamp":"2024-01-01T00:00:00Z"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Traded instrument.
    pub symbol: Symbol,
    /// Execution price.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Execution time reported by the exchange.
    pub timestamp: DateTime<Utc>,
    /// Aggressor side, when the feed reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side: Option<TradeSide>,
    /// Contract quantity, when the feed reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    /// Exchange-assigned match identifier, when the feed reports it.
    #[serde(
        rename = "tradeId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub trade_id: Option<String>,
}

impl TradeEvent {
    /// Create a trade event without side or size.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, price: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp,
            side: None,
            size: None,
            trade_id: None,
        }
    }

    /// Serialize into a delivery frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the price cannot be represented as a JSON number.
    pub fn to_frame(&self) -> Result<DeliveryFrame, serde_json::Error> {
        serde_json::to_string(self).map(DeliveryFrame::from)
    }
}
