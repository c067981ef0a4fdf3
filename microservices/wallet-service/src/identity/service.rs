//! Identity Service
//!
//! Registration, login, password reset and the bootstrap admin. A user's id
//! is also their ledger account id.

use chrono::{Datelike, NaiveDate};
use dashmap::DashMap;
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::{Validate, ValidateEmail};
use zentra_core::Role;

use crate::auth::{hash_password, verify_password, AuthService};
use crate::error::{Result, WalletError};
use crate::ledger::{JournalRecord, LedgerStore};
use crate::types::User;

const MIN_AGE_YEARS: i32 = 18;
const REFERRAL_CODE_LEN: usize = 8;
const REFERRAL_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Sign-up form
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: String,
    #[validate(email(message = "A valid email address is required"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[validate(must_match(other = "password", message = "Passwords do not match"))]
    pub confirm_password: String,
    #[serde(default)]
    pub dob: Option<NaiveDate>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub referral_code: Option<String>,
}

/// New password with its confirmation
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PasswordReset {
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[validate(must_match(other = "password", message = "Passwords do not match"))]
    pub confirm_password: String,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

/// Whole years between `dob` and `today`
fn age_on(dob: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        age -= 1;
    }
    age
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn random_referral_code() -> String {
    let mut rng = rand::thread_rng();
    (0..REFERRAL_CODE_LEN)
        .map(|_| REFERRAL_CODE_ALPHABET[rng.gen_range(0..REFERRAL_CODE_ALPHABET.len())] as char)
        .collect()
}

async fn hash_off_thread(password: String) -> Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| WalletError::Internal(e.to_string()))?
}

async fn verify_off_thread(password: String, hash: String) -> Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| WalletError::Internal(e.to_string()))
}

#[derive(Clone)]
pub struct IdentityService {
    users: Arc<DashMap<Uuid, User>>,
    users_by_email: Arc<DashMap<String, Uuid>>,
    users_by_referral_code: Arc<DashMap<String, Uuid>>,
    /// Outstanding reset token ids; removed when used
    reset_tokens: Arc<DashMap<String, Uuid>>,
    /// Serializes user row writes so journal and memory agree
    write_lock: Arc<Mutex<()>>,
    ledger: LedgerStore,
    auth: AuthService,
}

impl IdentityService {
    pub fn new(ledger: LedgerStore, auth: AuthService) -> Self {
        Self {
            users: Arc::new(DashMap::new()),
            users_by_email: Arc::new(DashMap::new()),
            users_by_referral_code: Arc::new(DashMap::new()),
            reset_tokens: Arc::new(DashMap::new()),
            write_lock: Arc::new(Mutex::new(())),
            ledger,
            auth,
        }
    }

    /// Load journaled users
    pub fn restore(&self, users: &[User]) {
        for user in users {
            self.install(user.clone());
        }
        info!(users = self.users.len(), "Users restored");
    }

    fn install(&self, user: User) {
        self.users_by_email.insert(normalize_email(&user.email), user.id);
        self.users_by_referral_code
            .insert(user.referral_code.clone(), user.id);
        self.users.insert(user.id, user);
    }

    async fn persist(&self, user: &User) -> Result<()> {
        self.ledger
            .journal()
            .commit(&[JournalRecord::User(user.clone())])
            .await
    }

    fn unused_referral_code(&self) -> String {
        loop {
            let code = random_referral_code();
            if !self.users_by_referral_code.contains_key(&code) {
                return code;
            }
        }
    }

    pub async fn register(&self, mut form: Registration) -> Result<User> {
        form.name = form.name.trim().to_string();
        form.email = normalize_email(&form.email);
        form.validate()?;

        let dob = form
            .dob
            .ok_or_else(|| WalletError::Validation("Date of birth is required".to_string()))?;
        if age_on(dob, self.ledger.now().date_naive()) < MIN_AGE_YEARS {
            return Err(WalletError::Validation(format!(
                "You must be at least {} years old to register",
                MIN_AGE_YEARS
            )));
        }
        let referred_by = match non_empty(form.referral_code) {
            Some(code) => Some(
                self.users_by_referral_code
                    .get(&code.to_ascii_uppercase())
                    .map(|id| *id.value())
                    .ok_or_else(|| WalletError::Validation("Referral code is not valid".to_string()))?,
            ),
            None => None,
        };

        let password_hash = hash_off_thread(form.password).await?;

        let _write = self.write_lock.lock().await;
        if self.users_by_email.contains_key(&form.email) {
            return Err(WalletError::Conflict("Email is already registered".to_string()));
        }

        let user = User {
            id: Uuid::new_v4(),
            name: form.name,
            email: form.email,
            password_hash,
            role: Role::User,
            dob: Some(dob),
            country: non_empty(form.country),
            nationality: non_empty(form.nationality),
            referral_code: self.unused_referral_code(),
            referred_by,
            referral_bonus_paid: false,
            created_at: self.ledger.now(),
        };

        self.ledger.open_account(user.id).await?;
        self.persist(&user).await?;
        self.install(user.clone());

        info!(user_id = %user.id, referred = user.referred_by.is_some(), "User registered");
        Ok(user)
    }

    /// Check credentials and issue a bearer token
    pub async fn login(&self, email: &str, password: &str) -> Result<(String, User)> {
        let invalid = || WalletError::Unauthorized("Invalid email or password".to_string());
        let user = self.find_by_email(email).ok_or_else(invalid)?;

        if !verify_off_thread(password.to_string(), user.password_hash.clone()).await? {
            warn!(user_id = %user.id, "Failed login attempt");
            return Err(invalid());
        }

        let token = self.auth.generate_token(&user)?;
        debug!(user_id = %user.id, "User logged in");
        Ok((token, user))
    }

    /// Issue a one-hour reset token. Unknown emails yield `None`; callers
    /// must answer the same either way.
    pub async fn forgot_password(&self, email: &str) -> Result<Option<String>> {
        let user = match self.find_by_email(email) {
            Some(user) => user,
            None => {
                debug!("Password reset requested for unknown email");
                return Ok(None);
            }
        };

        let (token, grant) = self.auth.generate_reset_token(user.id)?;
        self.reset_tokens.insert(grant.token_id, user.id);
        info!(user_id = %user.id, "Password reset token issued");
        debug!(user_id = %user.id, reset_path = %format!("/reset-password/{}", token), "Password reset link");
        Ok(Some(token))
    }

    /// Set a new password with a single-use reset token
    pub async fn reset_password(&self, token: &str, form: PasswordReset) -> Result<()> {
        let grant = self.auth.verify_reset_token(token)?;
        form.validate()?;
        let password_hash = hash_off_thread(form.password).await?;

        let _write = self.write_lock.lock().await;
        match self.reset_tokens.remove(&grant.token_id) {
            Some((_, user_id)) if user_id == grant.user_id => {}
            _ => {
                return Err(WalletError::Validation(
                    "Reset link is invalid or has already been used".to_string(),
                ))
            }
        }

        let mut user = self
            .get(grant.user_id)
            .ok_or_else(|| WalletError::not_found("User"))?;
        user.password_hash = password_hash;
        self.persist(&user).await?;
        self.install(user);

        info!(user_id = %grant.user_id, "Password reset");
        Ok(())
    }

    /// Create the configured admin, or promote an existing user with that email
    pub async fn ensure_admin(&self, name: &str, email: &str, password: &str) -> Result<User> {
        let email = normalize_email(email);
        if !email.validate_email() {
            return Err(WalletError::Validation("ADMIN_EMAIL is not a valid email".to_string()));
        }

        if let Some(mut existing) = self.find_by_email(&email) {
            if existing.role.is_admin() {
                return Ok(existing);
            }
            let _write = self.write_lock.lock().await;
            existing.role = Role::Admin;
            self.persist(&existing).await?;
            self.install(existing.clone());
            info!(user_id = %existing.id, "Existing user promoted to admin");
            return Ok(existing);
        }

        PasswordReset {
            password: password.to_string(),
            confirm_password: password.to_string(),
        }
        .validate()?;
        let password_hash = hash_off_thread(password.to_string()).await?;
        let _write = self.write_lock.lock().await;
        let admin = User {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email,
            password_hash,
            role: Role::Admin,
            dob: None,
            country: None,
            nationality: None,
            referral_code: self.unused_referral_code(),
            referred_by: None,
            referral_bonus_paid: true,
            created_at: self.ledger.now(),
        };
        self.ledger.open_account(admin.id).await?;
        self.persist(&admin).await?;
        self.install(admin.clone());

        info!(user_id = %admin.id, "Bootstrap admin created");
        Ok(admin)
    }

    pub fn get(&self, id: Uuid) -> Option<User> {
        self.users.get(&id).map(|u| u.clone())
    }

    pub fn find_by_email(&self, email: &str) -> Option<User> {
        let id = *self.users_by_email.get(&normalize_email(email))?;
        self.get(id)
    }

    /// All users, oldest first
    pub fn list(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().map(|u| u.value().clone()).collect();
        users.sort_by_key(|u| u.created_at);
        users
    }

    pub fn referred_count(&self, referrer: Uuid) -> usize {
        self.users
            .iter()
            .filter(|u| u.value().referred_by == Some(referrer))
            .count()
    }

    pub async fn remove(&self, id: Uuid) -> Result<()> {
        let _write = self.write_lock.lock().await;
        if !self.users.contains_key(&id) {
            return Ok(());
        }
        self.ledger
            .journal()
            .commit(&[JournalRecord::UserDeleted(id)])
            .await?;
        self.forget(id);
        Ok(())
    }

    /// Hold off user writes while a deletion is journaled elsewhere
    pub(crate) async fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// Drop a user whose `UserDeleted` record is already journaled.
    /// The caller holds `lock_writes`.
    pub(crate) fn forget(&self, id: Uuid) {
        if let Some((_, user)) = self.users.remove(&id) {
            self.users_by_email.remove(&normalize_email(&user.email));
            self.users_by_referral_code.remove(&user.referral_code);
            self.reset_tokens.retain(|_, owner| *owner != id);
            info!(user_id = %id, "User removed");
        }
    }

    /// Mark the referee's first-deposit reward as taken and return their
    /// referrer. `None` when there is no referrer or it was already taken.
    pub(crate) async fn claim_referral(&self, referee: Uuid) -> Result<Option<Uuid>> {
        let _write = self.write_lock.lock().await;
        let mut user = match self.get(referee) {
            Some(user) => user,
            None => return Ok(None),
        };
        let referrer = match user.referred_by {
            Some(referrer) if !user.referral_bonus_paid => referrer,
            _ => return Ok(None),
        };

        user.referral_bonus_paid = true;
        self.persist(&user).await?;
        self.install(user);
        Ok(self.users.contains_key(&referrer).then_some(referrer))
    }

    /// Undo a claim whose bonus could not be credited
    pub(crate) async fn release_referral(&self, referee: Uuid) -> Result<()> {
        let _write = self.write_lock.lock().await;
        if let Some(mut user) = self.get(referee) {
            user.referral_bonus_paid = false;
            self.persist(&user).await?;
            self.install(user);
        }
        Ok(())
    }
}
