//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the fan-out services and the port interfaces
//! that define how they reach external systems.

/// Port interfaces for external systems (catalog, persistence, feed, identity).
pub mod ports;

/// Symbol registry, subscription mutation, and fan-out routing services.
pub mod services;
