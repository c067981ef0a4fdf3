//! Investment plan catalog

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::path::Path;
use zentra_core::ZentraError;

use crate::types::InvestmentPlan;

/// Read-only set of plans, in display order
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Vec<InvestmentPlan>,
}

fn plan(
    plan_id: &str,
    name: &str,
    min_amount: Decimal,
    max_amount: Option<Decimal>,
    daily_return_rate: Decimal,
    duration_days: u32,
    perks: &[&str],
) -> InvestmentPlan {
    InvestmentPlan {
        plan_id: plan_id.to_string(),
        name: name.to_string(),
        min_amount,
        max_amount,
        daily_return_rate,
        duration_days,
        perks: perks.iter().map(|p| p.to_string()).collect(),
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self {
            plans: vec![
                plan("bronze", "Bronze", dec!(100), Some(dec!(499)), dec!(0.10), 7, &[
                    "Daily returns",
                    "Basic support",
                ]),
                plan("silver", "Silver", dec!(500), Some(dec!(999)), dec!(0.15), 10, &[
                    "Daily returns",
                    "Priority support",
                ]),
                plan("gold", "Gold", dec!(1000), Some(dec!(4999)), dec!(0.18), 14, &[
                    "Daily returns",
                    "Priority support",
                    "Referral bonus",
                ]),
                plan("diamond", "Diamond", dec!(5000), None, dec!(0.22), 21, &[
                    "Daily returns",
                    "Dedicated account manager",
                    "Referral bonus",
                ]),
            ],
        }
    }
}

impl PlanCatalog {
    pub fn new(plans: Vec<InvestmentPlan>) -> Result<Self, ZentraError> {
        if plans.is_empty() {
            return Err(ZentraError::Config("plan catalog is empty".to_string()));
        }
        for (i, p) in plans.iter().enumerate() {
            if p.plan_id.trim().is_empty() {
                return Err(ZentraError::Config(format!("plan #{} has no id", i)));
            }
            if plans[..i].iter().any(|other| other.plan_id == p.plan_id) {
                return Err(ZentraError::Config(format!("duplicate plan id '{}'", p.plan_id)));
            }
            if p.min_amount <= Decimal::ZERO {
                return Err(ZentraError::Config(format!("plan '{}' needs a positive minimum", p.plan_id)));
            }
            if p.max_amount.map_or(false, |max| max < p.min_amount) {
                return Err(ZentraError::Config(format!("plan '{}' maximum is below its minimum", p.plan_id)));
            }
            if p.daily_return_rate < Decimal::ZERO || p.duration_days == 0 {
                return Err(ZentraError::Config(format!("plan '{}' has an invalid rate or duration", p.plan_id)));
            }
        }
        Ok(Self { plans })
    }

    /// Load a JSON array of plans
    pub fn from_file(path: &Path) -> Result<Self, ZentraError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ZentraError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ZentraError> {
        let plans: Vec<InvestmentPlan> = serde_json::from_str(raw)
            .map_err(|e| ZentraError::Config(format!("invalid plan catalog: {}", e)))?;
        Self::new(plans)
    }

    pub fn get(&self, plan_id: &str) -> Option<&InvestmentPlan> {
        self.plans
            .iter()
            .find(|p| p.plan_id.eq_ignore_ascii_case(plan_id.trim()))
    }

    pub fn all(&self) -> &[InvestmentPlan] {
        &self.plans
    }
}
