//! Admission control for the Hearth household backend.
//!
//! Every externally reachable operation passes through the same fixed
//! pipeline before its business logic runs: rate limit, principal
//! resolution, space authorization, tier/budget gating, and (for cacheable
//! assistant reads) a response cache consulted before any quota is spent.
//! This crate owns that pipeline; request handlers, persistence, and the
//! identity provider are collaborators at its boundary.

pub mod admission;
pub mod assist;
pub mod authz;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod observability;
pub mod rate_limit;
pub mod session;
pub mod state;
pub mod tier;
