//! Users, credentials and referrals

mod referral;
mod service;

pub use referral::{ReferralProgram, ReferralSummary};
pub use service::{IdentityService, PasswordReset, Registration};
