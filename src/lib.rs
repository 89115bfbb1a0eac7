//! Write-ahead log and catalog subsystem for a column-store engine.
//!
//! This crate durably logs mutations to a caller-managed set of persistent
//! columns ("BATs"), reconstructs the catalog (`object_id -> bid`) and a
//! logged key -> i64 sequence store on restart, and reclaims log segments
//! once their effects are absorbed into the underlying store's own
//! on-disk state. It does not implement the column store itself — see
//! [`store::ColumnStore`] for the seam the caller fills in.
//!
//! The [`Wal`] facade ties every piece together: open a directory, begin
//! and commit transactions, run a checkpoint. Everything else in this
//! crate is reachable directly for callers that want finer control (e.g.
//! a standalone legacy upgrade pass before `Wal::open`).

#![warn(missing_docs)]

pub mod apply;
pub mod catalog;
pub mod checkpoint;
pub mod codec;
pub mod config;
pub mod error;
pub mod header;
pub mod legacy;
pub mod log_stream;
pub mod replay;
pub mod segment;
pub mod sequence;
pub mod store;
pub mod transaction;
pub mod types;
pub mod value;
pub mod wal;

pub use catalog::Catalog;
pub use checkpoint::{CheckpointReport, Checkpointer};
pub use config::WalConfig;
pub use error::{Result, WalError};
pub use legacy::{LegacyUpgradeOutcome, LegacyUpgrader};
pub use sequence::SequenceStore;
pub use store::{ColumnStore, RecoveryState};
pub use transaction::TransactionBuilder;
pub use types::{Bid, ColumnType, LogId, ObjectId, Tid, TypeRegistry};
pub use value::AtomValue;
pub use wal::Wal;
