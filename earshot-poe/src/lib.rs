//! # Earshot Engagement/Payout Service
//!
//! Turns a stream of signed client heartbeat events into a fraud-resistant
//! measure of real listening time, and settles eligible sessions as
//! Lightning payments to artists:
//!
//! - [`engagement`]: heartbeat validation rules and the session state
//!   machine that accrues credited seconds
//! - [`payout`]: deterministic compensation and settlement orchestration
//! - [`wallet`]: wallet protocol client, credential cipher and storage
//! - [`api`]: the axum HTTP surface
//! - [`ratelimit`]: keyed submission rate limiting

pub mod api;
pub mod engagement;
pub mod error;
pub mod payout;
pub mod ratelimit;
pub mod state;
pub mod wallet;

pub use error::{Error, Result};
