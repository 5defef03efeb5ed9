//! BitMEX Adapters
//!
//! Implements the upstream side of the relay:
//!
//! - **Feed**: realtime WebSocket client for the `trade` table
//! - **Catalog**: REST client for the active instrument list
//! - **Codec**: JSON frame decoding and control frame encoding

pub mod catalog;
pub mod codec;
pub mod feed;
pub mod heartbeat;
pub mod messages;
pub mod reconnect;
pub mod state;

pub use catalog::HttpCatalog;
pub use codec::{CodecError, FeedMessage, JsonCodec};
pub use feed::{ControlCommand, FeedClient, FeedClientConfig, FeedClientError, FeedHandle};
pub use heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig, HeartbeatError};
pub use messages::{ControlFrame, ControlOp, InstrumentInfo, TradeRecord};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
pub use state::{FeedConnectionState, FeedState, FeedStatus};
