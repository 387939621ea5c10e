//! # Depot Guards - request budget enforcement
//!
//! In-process guard against request amplification: counts RPC invocations per
//! call site inside one logical request and fails fast when a site exceeds its
//! budget, with scoped exemptions for known-acceptable loops.

#![allow(missing_docs)]

pub mod budget;
pub mod policy;

pub use budget::{
    allow_n_plus_one, allow_n_plus_one_async, allow_ref_name_caching, ref_name_caching_allowed,
    with_ref_name_caching, CallBudgetTracker, MAXIMUM_CALLS_PER_SITE,
};
pub use policy::{EnforcementPolicy, EnvironmentPolicy, FixedPolicy};
