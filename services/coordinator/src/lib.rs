//! VPN fleet coordinator.
//!
//! Tracks a fleet of gateway nodes, keeps their health and statistics
//! current, picks nodes for new accounts and provisions client credentials
//! on the nodes' panels. The `fleetd` binary wires these together; the
//! library surface exists for integration testing and reuse.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod locks;
pub mod model;
pub mod monitor;
pub mod placement;
pub mod plans;
pub mod provisioner;
pub mod reconcile;
pub mod registry;
pub mod state;
pub mod sweeper;
pub mod worker;

pub use coordinator::Coordinator;
