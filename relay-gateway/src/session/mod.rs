//! Per-session conversation history.
//!
//! - [`types`]: role-tagged turns
//! - [`truncate`]: bounding a history to a number of turn pairs
//! - [`store`]: the process-wide, in-memory session map

pub mod store;
pub mod truncate;
pub mod types;

pub use store::HistoryStore;
pub use truncate::{truncate, DEFAULT_MAX_TURNS};
pub use types::{History, Role, Turn};
