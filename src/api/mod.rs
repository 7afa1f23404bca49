//! HTTP REST API for hybrid search and index administration.

mod handlers;
mod rest;

pub use handlers::*;
pub use rest::*;
