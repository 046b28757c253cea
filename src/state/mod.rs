//! State module for tracking run progress
//!
//! # Components
//!
//! - `RunState`: The lifecycle of one harvest run (idle, running, draining, done, failed)

mod run_state;

// Re-export main types
pub use run_state::RunState;
