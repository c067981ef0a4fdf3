//! Auth Service
//!
//! JWT bearer tokens, password-reset tokens and argon2 password hashing.

use argon2::{
    password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;
use zentra_core::{Caller, Role};

use crate::error::{Result, WalletError};
use crate::types::{Claims, User};

const ACCESS_AUDIENCE: &str = "zentra-wallet";
const RESET_AUDIENCE: &str = "password-reset";
const RESET_TOKEN_TTL_MINUTES: i64 = 60;

/// Decoded password-reset token
#[derive(Debug, Clone)]
pub struct ResetGrant {
    pub user_id: Uuid,
    pub token_id: String,
}

#[derive(Clone)]
pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    expiry_secs: u64,
}

impl AuthService {
    pub fn new(secret: &str, issuer: &str, expiry_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            expiry_secs,
        }
    }

    /// Generate access token
    pub fn generate_token(&self, user: &User) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(self.expiry_secs as i64);

        let claims = Claims {
            sub: user.id.to_string(),
            iss: self.issuer.clone(),
            aud: ACCESS_AUDIENCE.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            email: user.email.clone(),
            role: user.role,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| WalletError::Internal(e.to_string()))
    }

    fn decode_claims(&self, token: &str, audience: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[audience]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| WalletError::Unauthorized(format!("Invalid token: {}", e)))
    }

    /// Validate an access token and resolve the caller it names
    pub fn authenticate(&self, token: &str) -> Result<Caller> {
        let claims = self.decode_claims(token, ACCESS_AUDIENCE)?;
        let account_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| WalletError::Unauthorized("Invalid token subject".to_string()))?;
        Ok(Caller::new(account_id, claims.role))
    }

    /// Generate password reset token; returns the token and its grant
    pub fn generate_reset_token(&self, user_id: Uuid) -> Result<(String, ResetGrant)> {
        let now = Utc::now();
        let exp = now + Duration::minutes(RESET_TOKEN_TTL_MINUTES);
        let token_id = Uuid::new_v4().to_string();

        let claims = Claims {
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            aud: RESET_AUDIENCE.to_string(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            jti: token_id.clone(),
            email: String::new(),
            role: Role::User,
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| WalletError::Internal(e.to_string()))?;
        Ok((token, ResetGrant { user_id, token_id }))
    }

    /// Validate a reset token; returns the user and the token id
    pub fn verify_reset_token(&self, token: &str) -> Result<ResetGrant> {
        let claims = self
            .decode_claims(token, RESET_AUDIENCE)
            .map_err(|_| WalletError::Validation("Reset link is invalid or has expired".to_string()))?;
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| WalletError::Validation("Reset link is invalid or has expired".to_string()))?;
        Ok(ResetGrant {
            user_id,
            token_id: claims.jti,
        })
    }
}

/// Hash password
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::encode_b64(&rand::random::<[u8; 16]>())
        .map_err(|e| WalletError::Internal(e.to_string()))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| WalletError::Internal(e.to_string()))
}

/// Verify password
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}
