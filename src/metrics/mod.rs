pub mod collector;

pub use collector::{MetricsSnapshot, SecurityMetrics};
