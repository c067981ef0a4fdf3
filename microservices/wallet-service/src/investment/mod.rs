//! Investment plans, positions and their maturation

mod engine;
mod plans;
mod scheduler;

pub use engine::{InvestmentEngine, InvestmentOutcome, InvestmentView, MaturationReport};
pub use plans::PlanCatalog;
pub use scheduler::MaturationScheduler;
