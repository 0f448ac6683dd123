//! Bearer token verification and connect-time authentication.

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::store::UserDirectory;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID).
    pub sub: String,
    /// Email of the user.
    pub email: String,
    /// User role.
    pub role: UserRole,
    /// Issued at (Unix timestamp).
    pub iat: i64,
    /// Expiration time (Unix timestamp).
    pub exp: i64,
}

/// User role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Administrator.
    Admin,
    /// Regular user.
    #[default]
    User,
}

/// The authenticated identity bound to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// User identifier.
    pub user_id: String,
    /// Email address.
    pub email: String,
    /// Role.
    pub role: UserRole,
}

/// HS256 token signer and verifier.
#[derive(Clone)]
pub struct JwtVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_secs: i64,
    leeway_secs: u64,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("ttl_secs", &self.ttl_secs)
            .field("leeway_secs", &self.leeway_secs)
            .finish_non_exhaustive()
    }
}

impl JwtVerifier {
    /// Creates a verifier from configuration.
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            ttl_secs: i64::try_from(config.token_ttl_secs).unwrap_or(i64::MAX),
            leeway_secs: config.leeway_secs,
        }
    }

    /// Signs a token for a user, valid for the configured lifetime.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidToken`] if encoding fails.
    pub fn issue(&self, user_id: &str, email: &str, role: UserRole) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        self.sign(&Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            role,
            iat: now,
            exp: now.saturating_add(self.ttl_secs),
        })
    }

    /// Signs arbitrary claims.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidToken`] if encoding fails.
    pub fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::default(), claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidToken(format!("failed to sign token: {e}")))
    }

    /// Validates a token's signature and expiry and returns its claims.
    ///
    /// # Errors
    /// Returns [`AuthError::Expired`] for expired tokens and
    /// [`AuthError::InvalidToken`] for anything else that fails to decode.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.leeway_secs;

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }
}

/// Resolves a handshake credential to an active principal.
pub struct Authenticator {
    verifier: JwtVerifier,
    users: Arc<dyn UserDirectory>,
}

impl Authenticator {
    /// Creates an authenticator over a verifier and a user directory.
    #[must_use]
    pub fn new(verifier: JwtVerifier, users: Arc<dyn UserDirectory>) -> Self {
        Self { verifier, users }
    }

    /// Returns the underlying token verifier.
    #[must_use]
    pub fn verifier(&self) -> &JwtVerifier {
        &self.verifier
    }

    /// Authenticates a bearer credential supplied at connect time.
    ///
    /// # Errors
    /// Fails when the token is missing, invalid or expired, when the subject
    /// is unknown or inactive, or when the user directory is unreachable.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<Principal, AuthError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let claims = self.verifier.verify(token)?;

        let user = self
            .users
            .find_active_user_by_id(&claims.sub)
            .await
            .map_err(|e| AuthError::IdentityUnavailable(e.0))?
            .ok_or_else(|| AuthError::InactivePrincipal(claims.sub.clone()))?;

        debug!(user = %user.id, "handshake credential accepted");

        Ok(Principal {
            user_id: user.id,
            email: user.email,
            role: user.role,
        })
    }
}

/// Extracts the bearer token from an Authorization header value.
#[must_use]
pub fn bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
