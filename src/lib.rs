//! Two-party FX trade proposals.
//!
//! An initiator drafts a [`trade::TradeRecord`], checks it against the
//! [`contract`], signs it and sends it to the counterparty, who re-runs the same
//! checks before countersigning. The fully-signed record is handed to an
//! external [`finality::Finalizer`]. Both sides track their progress in an
//! immutable [`session::WorkflowSession`].

pub mod config;
pub mod contract;
pub mod error;
pub mod finality;
pub mod initiator;
pub mod party;
pub mod responder;
pub mod session;
pub mod signature;
pub mod trade;
pub mod transport;
pub mod utils;
