//! CLI command handlers.
//!
//! Every command builds a [`hybrid_retrieval::ServiceContext`] from the
//! loaded configuration and prints through the `output` module.

mod commands;
mod output;

pub use commands::*;
