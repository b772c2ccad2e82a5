//! Data models representing database entities.
//!
//! This module contains the structures that map to database tables, plus the
//! request and response shapes of the APIs that expose them.

/// Account holders, balances, pending rewards and the accounts API shapes
pub mod account_holder;
/// Activity events
pub mod activity;
/// Campaigns with their earn and reward rules
pub mod campaign;
/// Retailers, stores and reward configuration
pub mod retailer;
/// Allocated and unallocated reward codes
pub mod reward;
/// Background retry tasks
pub mod task;
/// Purchases and refunds
pub mod transaction;
