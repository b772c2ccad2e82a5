//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They handle database transactions, validation, and complex operations.

/// Enrolment, activation and account views
pub mod account_service;
/// Activity event builders and storage
pub mod activity_service;
/// Scheduled balance resets
pub mod balance_service;
/// Enrolment callbacks to the retailer
pub mod callback_service;
/// Campaign status changes and migrations
pub mod campaign_service;
/// Earn calculation per transaction
pub mod earn;
/// Opt-out and reward microsite
pub mod public_service;
/// Refund absorption by pending rewards
pub mod refund;
/// Retailer lookups
pub mod retailer_service;
/// Reward issuance and pending reward conversion
pub mod reward_service;
/// Retry task queue, worker and scheduler
pub mod task_service;
/// Transaction processing
pub mod transaction_service;
