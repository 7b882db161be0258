//! Extension-side state persistence and reconciliation.
//!
//! The client may be closed, reloaded or migrated across tabs at any time.
//! It renders its cached view immediately, then reconciles against the
//! server, which is always authoritative for task status.

mod state;
mod store;

pub use state::{ClientStateManager, Controls, PersistedState, Settings};
pub use store::{Area, MemoryStore, StateStore};
