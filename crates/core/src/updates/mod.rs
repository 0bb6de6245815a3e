//! Real-time update system.
//!
//! A committed variable change is turned into a cascade: every transitive
//! dependent is re-evaluated in topological order and subscribers hear
//! about the results once the cascade commits.

mod bus;
mod events;
mod metrics;

pub use bus::{UpdateBus, cascade_order};
pub use events::UpdateEvent;
pub use metrics::{EngineMetrics, MetricsSnapshot};
