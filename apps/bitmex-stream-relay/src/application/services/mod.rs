//! Application Services
//!
//! Services that orchestrate domain containers and coordinate between ports.
//!
//! - `SymbolRegistry`: known symbols, catalog refresh, index seeding
//! - `SubscriptionService`: validated subscribe and unsubscribe mutations
//! - `FanoutRouter`: routes one trade event to every interested connection

mod router;
mod subscription;
mod symbols;

pub use router::{DeliveryReport, FanoutRouter, RouteOutcome};
pub use subscription::{SubscriptionError, SubscriptionService};
pub use symbols::{RefreshError, ReplaySummary, SymbolRegistry};
