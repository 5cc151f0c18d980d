//! Authentication gate
//!
//! Verifies the bearer credential presented at channel-open time: an HS256
//! token signed with the agent's shared secret, carrying a role claim and a
//! 24-hour expiry. Verification is synchronous and side-effect-free; a
//! rejected credential fails the channel-open attempt before any session
//! resource is allocated.

use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};

/// Token lifetime in hours.
pub const TOKEN_TTL_HOURS: i64 = 24;

/// Authentication errors
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No credential was provided
    #[error("authentication required")]
    Missing,

    /// Signature did not verify or the token is malformed
    #[error("invalid credentials")]
    Invalid,

    /// The token's expiry has passed
    #[error("credentials expired")]
    Expired,

    /// Token could not be minted
    #[error("auth internal error: {0}")]
    Internal(String),
}

/// Signed claims carried by a bearer token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Principal role (the agent only knows "admin")
    pub role: String,
    /// Expiry as a unix timestamp
    pub exp: usize,
}

/// The decoded principal attached to an authenticated channel.
#[derive(Debug, Clone)]
pub struct Principal {
    /// Role claim from the verified token
    pub role: String,
}

/// Verifies and mints bearer tokens against one shared secret.
pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Create a verifier for the given shared secret.
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Mint a token for the given role, expiring in [`TOKEN_TTL_HOURS`].
    pub fn issue(&self, role: &str) -> Result<String, AuthError> {
        let exp = (Utc::now() + Duration::hours(TOKEN_TTL_HOURS)).timestamp() as usize;
        let claims = Claims {
            role: role.to_string(),
            exp,
        };
        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| AuthError::Internal(e.to_string()))
    }

    /// Verify a bearer token and return its principal.
    pub fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Missing);
        }
        match decode::<Claims>(token, &self.decoding, &self.validation) {
            Ok(data) => Ok(Principal {
                role: data.claims.role,
            }),
            Err(e) => match e.kind() {
                ErrorKind::ExpiredSignature => Err(AuthError::Expired),
                _ => Err(AuthError::Invalid),
            },
        }
    }
}
