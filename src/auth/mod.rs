/*!
 * # Authentication
 *
 * Bearer tokens are issued by the platform's identity service; this crate only
 * verifies them. Tokens are HS256 JWTs signed with `jwt_secret`.
 *
 * A user may act on a shop's orders as a *shop admin* when the token carries the
 * `admin` role or the user owns the shop.
 */

use crate::{entities::shop, errors::ServiceError};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
    response::{IntoResponse, Response},
};
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

pub const ADMIN_ROLE: &str = "admin";

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Authenticated caller extracted from the bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub roles: Vec<String>,
}

impl AuthUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }

    /// Platform admins and the shop's owner manage its orders.
    pub fn can_manage(&self, shop: &shop::Model) -> bool {
        self.is_admin() || shop.owner_id == self.user_id
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::TokenCreation(msg) => ServiceError::InternalError(msg),
            other => ServiceError::Unauthorized(other.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ServiceError::from(self).into_response()
    }
}

/// Verifies (and, for tooling and tests, issues) bearer tokens.
#[derive(Clone)]
pub struct JwtVerifier {
    secret: Arc<str>,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Arc::from(secret),
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        let claims = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })?
        .claims;

        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        Ok(AuthUser {
            user_id,
            email: claims.email,
            roles: claims.roles,
        })
    }

    pub fn issue(&self, user: &AuthUser, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now();
        let ttl = ChronoDuration::from_std(ttl)
            .map_err(|_| AuthError::TokenCreation("invalid token lifetime".to_string()))?;
        let claims = Claims {
            sub: user.user_id.to_string(),
            email: user.email.clone(),
            roles: user.roles.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, AuthError> {
    let value = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::MissingToken)?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtVerifier: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)?;
        let user = JwtVerifier::from_ref(state).verify(token)?;
        debug!(user_id = %user.user_id, "authenticated request");
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    const SECRET: &str = "unit_test_secret_that_is_long_enough_123456";

    fn customer() -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            email: Some("c@example.com".into()),
            roles: vec!["customer".into()],
        }
    }

    #[test]
    fn issued_tokens_verify() {
        let verifier = JwtVerifier::new(SECRET);
        let user = customer();
        let token = verifier.issue(&user, Duration::from_secs(60)).unwrap();
        assert_eq!(verifier.verify(&token).unwrap(), user);
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let token = JwtVerifier::new("another_secret_that_is_long_enough_654321")
            .issue(&customer(), Duration::from_secs(60))
            .unwrap();
        assert!(matches!(
            JwtVerifier::new(SECRET).verify(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn shop_owner_and_admin_can_manage() {
        let owner = customer();
        let shop = shop::Model {
            id: Uuid::new_v4(),
            subdomain: "tea".into(),
            name: "Tea".into(),
            owner_id: owner.user_id,
            currency: "USD".into(),
            stripe_account_id: None,
            stripe_connected: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(owner.can_manage(&shop));
        assert!(!customer().can_manage(&shop));

        let admin = AuthUser {
            roles: vec![ADMIN_ROLE.into()],
            ..customer()
        };
        assert!(admin.can_manage(&shop));
    }

    #[test]
    fn bearer_prefix_is_required() {
        let (parts, _) = Request::builder()
            .header(header::AUTHORIZATION, "Token abc")
            .body(())
            .unwrap()
            .into_parts();
        assert!(matches!(bearer_token(&parts), Err(AuthError::MissingToken)));
    }
}
