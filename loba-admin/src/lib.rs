//! loba Admin Control Plane
//!
//! Serves the administrative HTTP surface: liveness, configuration reload,
//! the per-domain request report and a view of the live pools.

pub mod reload;
pub mod server;

pub use reload::{load_registry, HealthSeed, ReloadSummary, Reloader};
pub use server::{serve, AdminService};
