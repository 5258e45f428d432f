//! Identifier definitions.

use crate::{define_id, define_key};

define_id!(
    /// A remote gateway node ("panel") registered with the coordinator.
    NodeId,
    "node"
);

define_id!(
    /// A client account provisioned on a node.
    AccountId,
    "acct"
);

define_key!(
    /// Chat user that owns accounts. Assigned by the messaging platform.
    UserId
);

define_key!(
    /// Tariff plan row in the sales catalogue.
    PlanId
);
