//! loba core functionality.
//!
//! This crate contains the backend pools, the round-robin selector, the health
//! monitor cycle and the configuration-to-registry builder that power the loba
//! load balancer. Transport, storage and process wiring live in `loba-proxy`
//! and `loba-admin`; they reach the routing state only through
//! [`domain::routing::RoutingTable`].

pub mod completion;
pub mod config;
pub mod error;
pub mod health;

pub mod domain {
    //! Routing state: backends, pools, registries and the swappable table.

    pub mod backend;
    pub mod pool;
    pub mod registry;
    pub mod routing;
}

pub mod load_balancer {
    //! Backend selection.

    pub mod selector;
}

pub use domain::backend::{Backend, SharedBackend};
pub use domain::pool::Pool;
pub use domain::registry::Registry;
pub use domain::routing::{RoutingTable, SharedRoutingTable};
pub use error::{ConfigError, ProbeFailure, RouteError, StoreError};
