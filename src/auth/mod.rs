//! Bearer-token authentication.
//!
//! [`auth_middleware`] validates the `Authorization: Bearer <jwt>` header and
//! stores the caller's [`CustomerIdentity`] in the request extensions. Handlers
//! take `CustomerIdentity` as an extractor and pass it on explicitly.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::ServiceError;

const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String, // Customer id
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerIdentity {
    pub customer_id: Uuid,
    pub token_id: String,
}

impl CustomerIdentity {
    pub fn new(customer_id: Uuid) -> Self {
        Self {
            customer_id,
            token_id: Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    TokenExpired,
    #[error("Token could not be issued: {0}")]
    Issue(String),
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Issue(msg) => ServiceError::InternalError(msg),
            other => ServiceError::Unauthorized(other.to_string()),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ServiceError::from(self).into_response()
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: String,
    pub token_ttl: Duration,
}

impl From<&AppConfig> for AuthConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            jwt_secret: config.jwt_secret.clone(),
            issuer: config.auth_issuer.clone(),
            token_ttl: DEFAULT_TOKEN_TTL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthService {
    config: AuthConfig,
}

impl AuthService {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Issues a signed access token for `customer_id`.
    pub fn issue_token(&self, customer_id: Uuid) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: customer_id.to_string(),
            iss: self.config.issuer.clone(),
            iat: now,
            exp: now + self.config.token_ttl.as_secs() as i64,
            jti: Uuid::new_v4().to_string(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::Issue(e.to_string()))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.issuer.as_str()]);

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> Result<CustomerIdentity, AuthError> {
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let claims = self.validate_token(token)?;
        let customer_id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;

        Ok(CustomerIdentity {
            customer_id,
            token_id: claims.jti,
        })
    }
}

/// Rejects the request with 401 unless it carries a valid bearer token.
pub async fn auth_middleware(
    State(auth): State<Arc<AuthService>>,
    mut request: Request,
    next: Next,
) -> Response {
    match auth.authenticate(request.headers()) {
        Ok(identity) => {
            debug!(customer_id = %identity.customer_id, "request authenticated");
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CustomerIdentity
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CustomerIdentity>()
            .cloned()
            .ok_or_else(|| ServiceError::Unauthorized("Authentication required".to_string()))
    }
}
