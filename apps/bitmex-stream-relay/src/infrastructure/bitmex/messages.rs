//! BitMEX Wire Messages
//!
//! Serde types for the BitMEX realtime WebSocket and the instrument REST
//! endpoint. Only the fields the relay uses are modeled; unknown fields are
//! ignored.
//!
//! # Control frame
//!
//! ```json
//! {"op":"subscribe","args":["trade:XBTUSD","trade:ETHUSD"]}
//! ```
//!
//! # Table frame
//!
//! ```json
//! {"table":"trade","action":"insert","data":[{"symbol":"XBTUSD","price":50000,...}]}
//! ```

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::streaming::{TradeEvent, TradeSide};
use crate::domain::symbols::Symbol;

/// Topic prefix for the trade table.
pub const TRADE_TOPIC_PREFIX: &str = "trade:";

/// Table name carrying executed trades.
pub const TRADE_TABLE: &str = "trade";

// =============================================================================
// Control Frames (outbound)
// =============================================================================

/// Control operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlOp {
    /// Start streaming topics.
    Subscribe,
    /// Stop streaming topics.
    Unsubscribe,
}

impl ControlOp {
    /// Wire name of the operation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

/// Subscribe or unsubscribe frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFrame {
    /// Operation.
    pub op: ControlOp,
    /// Topics, each `trade:<symbol>`.
    pub args: Vec<String>,
}

impl ControlFrame {
    /// Build frames for the trade topics of `symbols`, at most
    /// `batch_size` topics per frame. Empty input yields no frames.
    #[must_use]
    pub fn batches(op: ControlOp, symbols: &[Symbol], batch_size: usize) -> Vec<Self> {
        symbols
            .chunks(batch_size.max(1))
            .map(|chunk| Self {
                op,
                args: chunk
                    .iter()
                    .map(|symbol| format!("{TRADE_TOPIC_PREFIX}{symbol}"))
                    .collect(),
            })
            .collect()
    }

    /// Symbols named by the trade topics in this frame.
    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.args
            .iter()
            .filter_map(|arg| arg.strip_prefix(TRADE_TOPIC_PREFIX))
    }
}

// =============================================================================
// Inbound Frames
// =============================================================================

/// Table update frame. `data` is kept raw until the table is known.
#[derive(Debug, Clone, Deserialize)]
pub struct TableMessage {
    /// Table name.
    pub table: String,
    /// `partial`, `insert`, `update` or `delete`.
    pub action: String,
    /// Rows.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl TableMessage {
    /// Whether this frame carries new trades.
    #[must_use]
    pub fn is_trade_insert(&self) -> bool {
        self.table == TRADE_TABLE && self.action == "insert"
    }
}

/// One row of the trade table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRecord {
    /// Execution time.
    pub timestamp: DateTime<Utc>,
    /// Instrument.
    pub symbol: Symbol,
    /// Aggressor side.
    #[serde(default)]
    pub side: Option<TradeSide>,
    /// Contracts traded.
    #[serde(default)]
    pub size: Option<u64>,
    /// Execution price.
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    /// Match identifier.
    #[serde(default, rename = "trdMatchID")]
    pub trd_match_id: Option<String>,
}

impl From<TradeRecord> for TradeEvent {
    fn from(record: TradeRecord) -> Self {
        Self {
            symbol: record.symbol,
            price: record.price,
            timestamp: record.timestamp,
            side: record.side,
            size: record.size,
            trade_id: record.trd_match_id,
        }
    }
}

/// Welcome banner sent after connect.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InfoMessage {
    /// Banner text.
    pub info: String,
    /// Server version.
    #[serde(default)]
    pub version: Option<String>,
}

/// Acknowledgement of a control frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SuccessMessage {
    /// Whether the operation succeeded.
    pub success: bool,
    /// Topic subscribed, on subscribe.
    #[serde(default)]
    pub subscribe: Option<String>,
    /// Topic unsubscribed, on unsubscribe.
    #[serde(default)]
    pub unsubscribe: Option<String>,
}

/// Error reported by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorMessage {
    /// Error text.
    pub error: String,
    /// HTTP-style status code.
    #[serde(default)]
    pub status: Option<u16>,
}

// =============================================================================
// REST
// =============================================================================

/// Instrument descriptor from `/api/v1/instrument/active`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentInfo {
    /// Instrument symbol.
    pub symbol: Symbol,
    /// Root symbol (e.g. `XBT`).
    #[serde(default)]
    pub root_symbol: Option<String>,
    /// Listing state (e.g. `Open`).
    #[serde(default)]
    pub state: Option<String>,
    /// Instrument type code.
    #[serde(default)]
    pub typ: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(count: usize) -> Vec<Symbol> {
        (0..count).map(|i| format!("SYM{i}")).collect()
    }

    #[test]
    fn control_frame_serializes_with_trade_topics() {
        let frames = ControlFrame::batches(ControlOp::Subscribe, &["XBTUSD".into()], 15);

        let json = serde_json::to_string(&frames[0]).unwrap();

        assert_eq!(json, r#"{"op":"subscribe","args":["trade:XBTUSD"]}"#);
    }

    #[test]
    fn batches_split_at_batch_size() {
        let frames = ControlFrame::batches(ControlOp::Unsubscribe, &names(31), 15);

        let sizes: Vec<_> = frames.iter().map(|f| f.args.len()).collect();
        assert_eq!(sizes, vec![15, 15, 1]);
        assert!(frames.iter().all(|f| f.op == ControlOp::Unsubscribe));
    }

    #[test]
    fn no_symbols_no_frames() {
        assert!(ControlFrame::batches(ControlOp::Subscribe, &[], 15).is_empty());
    }

    #[test]
    fn frame_symbols_strip_prefix() {
        let frame = ControlFrame::batches(ControlOp::Subscribe, &names(2), 15).remove(0);
        let symbols: Vec<_> = frame.symbols().collect();
        assert_eq!(symbols, vec!["SYM0", "SYM1"]);
    }

    #[test]
    fn instrument_ignores_extra_fields() {
        let json = r#"{"symbol":"XBTUSD","rootSymbol":"XBT","state":"Open","typ":"FFWCSX","tickSize":0.5}"#;
        let info: InstrumentInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.symbol, "XBTUSD");
        assert_eq!(info.root_symbol.as_deref(), Some("XBT"));
    }

    #[test]
    fn trade_record_converts_to_event() {
        let json = r#"{"timestamp":"2024-01-01T00:00:00.000Z","symbol":"XBTUSD","side":"Buy","size":100,"price":50000.5,"tickDirection":"PlusTick","trdMatchID":"abc","grossValue":1}"#;
        let record: TradeRecord = serde_json::from_str(json).unwrap();

        let event = TradeEvent::from(record);

        assert_eq!(event.symbol, "XBTUSD");
        assert_eq!(event.price, Decimal::new(500_005, 1));
        assert_eq!(event.side, Some(TradeSide::Buy));
        assert_eq!(event.trade_id.as_deref(), Some("abc"));
    }

    mod property_tests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            /// Batching never exceeds the batch size and never loses or
            /// reorders a topic.
            #[test]
            fn prop_batches_preserve_topics(
                symbols in prop::collection::vec("[A-Z]{3,8}", 0..64),
                batch_size in 1usize..32,
            ) {
                let frames = ControlFrame::batches(ControlOp::Subscribe, &symbols, batch_size);

                prop_assert_eq!(frames.len(), symbols.len().div_ceil(batch_size));
                prop_assert!(frames.iter().all(|f| !f.args.is_empty() && f.args.len() <= batch_size));

                let flattened: Vec<&str> = frames.iter().flat_map(|f| f.symbols()).collect();
                let expected: Vec<&str> = symbols.iter().map(String::as_str).collect();
                prop_assert_eq!(flattened, expected);
            }
        }
    }
}
