//! Conversation session storage for the Kuber assistant.
//!
//! Two pieces live here:
//!
//! - [`SessionStore`]: the process-wide, capacity-bounded map from session id
//!   to [`SessionRecord`](kuber_types::SessionRecord). It validates and
//!   appends messages, serves recent history, and triggers auto-saves.
//! - [`SessionWriter`] / [`JsonFileWriter`]: stateless persistence of a
//!   session snapshot to `<dir>/session_<id>.json`.
//!
//! The store owns every session for the life of the process (or until it is
//! evicted). The writer never holds state; it is handed a snapshot and writes
//! it out on the blocking thread pool.

mod error;
mod persist;
mod store;

pub use error::SessionError;
pub use persist::{JsonFileWriter, SessionWriter};
pub use store::{AppendOutcome, EvictionPolicy, History, SessionStore, StoreSettings};
