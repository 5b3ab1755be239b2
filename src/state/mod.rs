//! Local state management.
//!
//! This module provides the per-project state document that holds variable
//! overrides, service run state and service options, and the atomic rename
//! used to save it.

pub mod local_state;
pub mod rename;

pub use local_state::{LocalStateFile, LOCAL_STATE_FILENAME};
pub use rename::rename_over_existing;
