//! Multi-source application discovery.
//!
//! Collectors turn external state (a container engine, reverse-proxy configs
//! and admin APIs, the Unraid API) into [`DiscoveredApp`] lists. The
//! [`Supervisor`] runs one periodic loop per enabled source and publishes
//! each result into the [`SourceRegistry`]. The [`Reconciler`] joins the live
//! registry with administrator overrides from an [`OverrideStore`].
//!
//! [`DiscoveredApp`]: lantern_protocol::DiscoveredApp

pub mod caddy;
pub mod collector;
pub mod config;
pub mod docker;
mod error;
pub mod http;
pub mod limits;
mod naming;
pub mod nginx;
pub mod npm;
pub mod reconcile;
pub mod registry;
pub mod safety;
pub mod store;
pub mod supervisor;
pub mod traefik;
pub mod unraid;

#[cfg(test)]
mod test_support;

pub use collector::{default_collectors, Collector, SourceSnapshot};
pub use config::{ConfigProvider, SystemConfig};
pub use error::{DiscoveryError, ReconcileError, Result, ValidationError};
pub use http::BackendClient;
pub use reconcile::Reconciler;
pub use registry::SourceRegistry;
pub use store::{JsonFileOverrideStore, MemoryOverrideStore, OverrideStore};
pub use supervisor::Supervisor;
