//! Feed Codec
//!
//! Decodes BitMEX realtime text frames and encodes control frames.
//!
//! Inbound frames are JSON objects distinguished by their keys
//! (`table`, `info`, `success`, `error`), except the heartbeat reply,
//! which is the bare text `pong`.

use crate::domain::streaming::TradeEvent;
use crate::infrastructure::bitmex::messages::{
    ControlFrame, ErrorMessage, InfoMessage, SuccessMessage, TableMessage, TradeRecord,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame is JSON but not a known message shape.
    #[error("unrecognized frame: {0}")]
    Unrecognized(String),
}

/// One decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    /// New trades from a `trade` insert.
    Trades(Vec<TradeEvent>),
    /// Any other table frame, including trade `partial`.
    Table {
        /// Table name.
        table: String,
        /// Table action.
        action: String,
    },
    /// Welcome banner.
    Info(InfoMessage),
    /// Control frame acknowledgement.
    Success(SuccessMessage),
    /// Feed-reported error.
    Error(ErrorMessage),
    /// Heartbeat reply.
    Pong,
}

/// JSON codec for the BitMEX realtime feed.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid JSON or has no known shape.
    pub fn decode(&self, text: &str) -> Result<FeedMessage, CodecError> {
        let trimmed = text.trim();
        if trimmed == "pong" {
            return Ok(FeedMessage::Pong);
        }

        let value: serde_json::Value = serde_json::from_str(trimmed)?;
        let kind = value.as_object().and_then(|object| {
            ["table", "error", "success", "info"]
                .into_iter()
                .find(|key| object.contains_key(*key))
        });

        match kind {
            Some("table") => Self::decode_table(serde_json::from_value(value)?),
            Some("error") => Ok(FeedMessage::Error(serde_json::from_value(value)?)),
            Some("success") => Ok(FeedMessage::Success(serde_json::from_value(value)?)),
            Some("info") => Ok(FeedMessage::Info(serde_json::from_value(value)?)),
            _ => Err(CodecError::Unrecognized(preview(trimmed))),
        }
    }

    fn decode_table(table: TableMessage) -> Result<FeedMessage, CodecError> {
        if !table.is_trade_insert() {
            return Ok(FeedMessage::Table {
                table: table.table,
                action: table.action,
            });
        }

        let records: Vec<TradeRecord> = serde_json::from_value(table.data)?;
        Ok(FeedMessage::Trades(
            records.into_iter().map(TradeEvent::from).collect(),
        ))
    }

    /// Encode a control frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, frame: &ControlFrame) -> Result<String, CodecError> {
        Ok(serde_json::to_string(frame)?)
    }
}

fn preview(text: &str) -> String {
    text.chars().take(50).collect()
}
