//! # PocketSync Protocol
//!
//! Sync bookkeeping types and wire messages for PocketSync.
//!
//! This crate provides:
//! - Pending operations and the pending operation log
//! - The query-sync ledger of pull checkpoints
//! - Delta-set, error and count wire messages

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod ledger;
mod messages;
mod operation;
mod oplog;

pub use ledger::{QuerySyncLedger, QuerySyncRecord};
pub use messages::{error_codes, CountResponse, DeltaSetResponse, ErrorBody};
pub use operation::{OperationMethod, PendingOperation};
pub use oplog::PendingOperationLog;
