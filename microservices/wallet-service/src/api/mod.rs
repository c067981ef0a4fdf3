//! HTTP surface

mod extract;
pub mod rest;

pub use rest::{create_router, AppState};
