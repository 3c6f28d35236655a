//! Terminal front end for the topology engine

pub mod differ;
pub mod executor;

pub use differ::{display_diff, display_plan};
pub use executor::{ExecuteOptions, execute};
