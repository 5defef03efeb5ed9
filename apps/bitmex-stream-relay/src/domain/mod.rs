//! Domain Layer - Core fan-out types and concurrent containers.
//!
//! This layer holds the trade event model, subscriber identities, and the
//! three shared containers the fan-out engine is built on: the known symbol
//! set, the subscription index, and the connection registry. Nothing here
//! performs I/O.

/// Connection registry and per-subscriber outbound channels.
pub mod connection;

/// Trade event and delivery frame types.
pub mod streaming;

/// Subscriber identity, persisted state, and mutation requests.
pub mod subscriber;

/// Symbol to subscriber index.
pub mod subscription;

/// Append-only set of known symbols.
pub mod symbols;
