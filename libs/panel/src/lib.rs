//! Client for the control-plane HTTP API of a VPN gateway panel.
//!
//! Every gateway node runs a panel that manages the client credentials of its
//! inbounds and reports host statistics. The coordinator only ever talks to a
//! panel through the [`PanelApi`] trait:
//!
//! - [`PanelClient`]: the real implementation over `reqwest`
//! - [`MockPanel`]: an in-process fake for tests and local development
//!
//! Calls other than the liveness probe require a [`PanelSession`] obtained
//! from [`PanelApi::authenticate`]. Sessions are cheap and are not cached by
//! callers; each sync cycle logs in again.

mod api;
mod client;
mod error;
mod mock;
mod types;

pub use api::PanelApi;
pub use client::PanelClient;
pub use error::{PanelError, PanelResult};
pub use mock::{MockPanel, PanelOp};
pub use types::{
    ClientKey, ClientSpec, ClientTraffic, HealthReport, PanelEndpoint, PanelSession,
    RemoteClient, ServerStats,
};
