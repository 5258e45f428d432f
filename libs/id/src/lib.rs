//! # vpnfleet-id
//!
//! Identifier types shared by the fleet coordinator and its collaborators.
//!
//! Two families live here:
//!
//! - Records the coordinator creates itself (nodes, accounts) get a prefixed
//!   ULID: `node_01HV4Z2WQXKJNM8GPQY6VBKC3D`, `acct_01HV4Z3MXNKPQR9HSTZ7WCLD4E`.
//!   ULIDs sort by creation time, so ordering by id is ordering by
//!   registration.
//! - Keys owned by other systems (chat users, tariff plans) are plain
//!   integers wrapped in a newtype so they cannot be swapped by accident.
//!
//! Both families encode to Postgres (`TEXT` and `BIGINT` respectively).

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;

#[doc(hidden)]
pub mod __private {
    pub use serde;
    pub use sqlx;
}
