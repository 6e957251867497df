//! Voice event routing and enforcement.

pub mod armed;
pub mod engine;
mod recovery;

pub use engine::{
    MAINTENANCE_INTERVAL, MONITOR_INTERVAL, PERMISSION_CACHE_TTL, ProtectionEngine,
};
