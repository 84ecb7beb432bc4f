//! Cadence: local-first planner data with optional sync to a third-party
//! JSON document store.
//!
//! The planner's state lives in named slices inside an embedded key-value
//! store ([`store::PlannerStore`]). For sync, the slices are assembled
//! into one aggregate document ([`document::PlannerDocument`]), pushed to
//! and pulled from a remote bin ([`remote::BinClient`]), and reconciled
//! with a last-write-wins merge ([`merge::merge_documents`]). The
//! [`sync::SyncService`] drives the whole thing: a poll loop for remote
//! changes and a debounced upload for local ones, keyed to a
//! credential-derived identity ([`identity`]).

pub mod aggregate;
pub mod config;
pub mod document;
pub mod identity;
pub mod merge;
pub mod remote;
pub mod store;
pub mod sync;

pub use config::Config;
pub use document::{DocumentMeta, PlannerDocument, QuickTask, WeekSlot, YearGoal};
pub use remote::{BinClient, RemoteStore, ReplaceOutcome};
pub use store::PlannerStore;
pub use sync::{
    PollOutcome, PushOutcome, SyncError, SyncEvent, SyncHandle, SyncService, SyncState, SyncStatus,
};
