//! Proof-of-engagement pipeline: heartbeat validation rules and the
//! session state machine they feed.

pub mod rules;
pub mod session;

pub use rules::{HeartbeatPayload, RejectReason};
pub use session::{HeartbeatOutcome, accept_heartbeat, finalize_session, start_session};
