//! Output module for run outcomes and store statistics
//!
//! This module handles:
//! - The outcome a run returns to its caller
//! - Printing run outcomes
//! - Loading and printing statistics of the record store

mod outcome;
pub mod stats;

pub use outcome::RunOutcome;
pub use stats::{load_statistics, print_outcome, print_statistics, StoreStatistics};
