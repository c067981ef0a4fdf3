//! Privileged operations

mod gate;

pub use gate::{AccountView, AdminGate, AdminStats, PendingView, UserSummary};
