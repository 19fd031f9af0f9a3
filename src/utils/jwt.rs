// src/utils/jwt.rs

use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{config::Config, error::AppError};

/// Header carrying the browser fingerprint on exam-session calls.
pub const FINGERPRINT_HEADER: &str = "x-exam-fingerprint";

/// Token audience for user logins.
const USER_TOKEN: &str = "user";
/// Token audience for exam sessions.
const SESSION_TOKEN: &str = "exam_session";

/// JWT Claims for a logged-in user.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Claims {
    /// Subject - Stores the User ID (as string).
    pub sub: String,
    /// User's role (e.g., 'candidate', 'admin').
    pub role: String,
    /// Token kind, always "user".
    pub typ: String,
    /// Expiration time as Unix timestamp.
    pub exp: usize,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64, AppError> {
        self.sub
            .parse::<i64>()
            .map_err(|_| AppError::AuthError("Invalid token subject".to_string()))
    }
}

/// JWT Claims for an exam session.
///
/// Binds the token to one session and, when known, to the browser that
/// started it.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionClaims {
    /// Session ID.
    pub sub: String,
    /// Candidate-facing exam code.
    pub exam_id: String,
    pub fingerprint: Option<String>,
    /// Token kind, always "exam_session".
    pub typ: String,
    pub exp: usize,
}

fn expires_in(seconds: u64) -> Result<usize, AppError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| AppError::InternalServerError(e.to_string()))?
        .as_secs();
    Ok((now + seconds) as usize)
}

fn sign<T: Serialize>(claims: &T, secret: &str) -> Result<String, AppError> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalServerError(e.to_string()))
}

fn verify<T: DeserializeOwned>(token: &str, secret: &str) -> Result<T, AppError> {
    let token_data = decode::<T>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::AuthError("Invalid token".to_string()))?;

    Ok(token_data.claims)
}

/// Signs a new JWT for the user.
pub fn sign_jwt(id: i64, role: &str, secret: &str, expiration_seconds: u64) -> Result<String, AppError> {
    let claims = Claims {
        sub: id.to_string(),
        role: role.to_owned(),
        typ: USER_TOKEN.to_string(),
        exp: expires_in(expiration_seconds)?,
    };
    sign(&claims, secret)
}

/// Verifies and decodes a user JWT.
pub fn verify_jwt(token: &str, secret: &str) -> Result<Claims, AppError> {
    let claims: Claims = verify(token, secret)?;
    if claims.typ != USER_TOKEN {
        return Err(AppError::AuthError("Invalid token".to_string()));
    }
    Ok(claims)
}

/// Signs the token a candidate uses for the rest of the exam.
pub fn sign_session_token(
    session_id: &str,
    exam_id: &str,
    fingerprint: Option<&str>,
    secret: &str,
    ttl_seconds: u64,
) -> Result<String, AppError> {
    let claims = SessionClaims {
        sub: session_id.to_owned(),
        exam_id: exam_id.to_owned(),
        fingerprint: fingerprint.map(str::to_owned),
        typ: SESSION_TOKEN.to_string(),
        exp: expires_in(ttl_seconds)?,
    };
    sign(&claims, secret)
}

pub fn verify_session_token(token: &str, secret: &str) -> Result<SessionClaims, AppError> {
    let claims: SessionClaims = verify(token, secret)?;
    if claims.typ != SESSION_TOKEN {
        return Err(AppError::AuthError("Invalid token".to_string()));
    }
    Ok(claims)
}

fn bearer_token(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Axum Middleware: Authentication.
///
/// Intercepts requests, validates the 'Authorization: Bearer <token>' header.
/// If valid, injects `Claims` into the request extensions for handlers to use.
/// If invalid, returns 401 Unauthorized.
pub async fn auth_middleware(
    State(config): State<Config>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_token(&req).ok_or(StatusCode::UNAUTHORIZED)?;

    match verify_jwt(token, &config.jwt_secret) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            Ok(next.run(req).await)
        }
        Err(_) => Err(StatusCode::UNAUTHORIZED),
    }
}

/// Axum Middleware: Admin Authorization.
///
/// Must be used AFTER `auth_middleware`. Checks if the injected `Claims` has 'admin' role.
/// If not, returns 403 Forbidden.
pub async fn admin_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let claims = req
        .extensions()
        .get::<Claims>()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if claims.role != "admin" {
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(req).await)
}

/// Axum Middleware: Exam session.
///
/// Validates the session token and, for fingerprint-bound tokens, that the
/// request comes from the same browser. Injects `SessionClaims`.
pub async fn session_middleware(
    State(config): State<Config>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_token(&req).ok_or(StatusCode::UNAUTHORIZED)?;
    let claims =
        verify_session_token(token, &config.jwt_secret).map_err(|_| StatusCode::UNAUTHORIZED)?;

    if let Some(expected) = claims.fingerprint.as_deref() {
        let presented = req
            .headers()
            .get(FINGERPRINT_HEADER)
            .and_then(|value| value.to_str().ok());
        if presented != Some(expected) {
            tracing::warn!(session_id = %claims.sub, "Session token used from another browser");
            return Err(StatusCode::UNAUTHORIZED);
        }
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_and_session_tokens_are_not_interchangeable() {
        let user = sign_jwt(7, "candidate", "secret", 60).unwrap();
        let session = sign_session_token("s-1", "BAC2500123", Some("fp-123456"), "secret", 60).unwrap();

        assert_eq!(verify_jwt(&user, "secret").unwrap().user_id().unwrap(), 7);
        assert!(verify_session_token(&user, "secret").is_err());

        let claims = verify_session_token(&session, "secret").unwrap();
        assert_eq!(claims.sub, "s-1");
        assert_eq!(claims.fingerprint.as_deref(), Some("fp-123456"));
        assert!(verify_jwt(&session, "secret").is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = sign_session_token("s-1", "BAC2500123", None, "secret", 60).unwrap();
        assert!(verify_session_token(&token, "other").is_err());
    }
}
