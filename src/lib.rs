//! cosmos: loyalty backend for retailer campaigns.
//!
//! One crate serves four HTTP APIs (accounts, transactions, campaigns and
//! public), a retry task worker and the pending reward scheduler. Which of
//! them a process runs is chosen on the command line.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod middleware;
pub mod models;
pub mod payload;
pub mod services;
pub mod state;
pub mod validation;
