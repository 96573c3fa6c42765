//! Credential authentication handlers
//!
//! Implements local (username-or-email + password) login and registration,
//! plus the authenticated profile endpoint. Successful login and
//! registration both return a JWT and the public user view (auto-login
//! after registration).

use crate::api::handlers::{AppError, RelayState};
use crate::auth::jwt::{encode_jwt, Claims};
use crate::store::models::UserRecord;
use axum::{extract::State, Extension, Json};
use serde::{Deserialize, Serialize};

/// Request body for POST /api/auth/local
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email
    pub identifier: String,
    pub password: String,
}

/// Request body for POST /api/auth/local/register
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Public user view (never includes the password hash)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
}

impl From<UserRecord> for UserResponse {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
        }
    }
}

/// Response for login/register: token + user info
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthTokenResponse {
    pub jwt: String,
    pub user: UserResponse,
}

/// POST /api/auth/local — Credential authentication.
///
/// Flow:
/// 1. Check that auth is configured
/// 2. Look up user by username, falling back to email lookup
/// 3. Verify password with bcrypt
/// 4. Return JWT + user info
///
/// Security: error messages never reveal whether the account exists.
pub async fn login(
    State(state): State<RelayState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthTokenResponse>, AppError> {
    let auth_config = state
        .auth_config
        .as_ref()
        .ok_or_else(|| AppError::Forbidden("Authentication not configured".to_string()))?;

    // Generic error to prevent user enumeration
    let invalid_credentials =
        || AppError::BadRequest("Invalid identifier or password".to_string());

    if req.identifier.trim().is_empty() || req.password.is_empty() {
        return Err(invalid_credentials());
    }

    // 1. Look up by username first, then by email
    let user = match state.store.get_user_by_username(&req.identifier).await? {
        Some(user) => Some(user),
        None => state.store.get_user_by_email(&req.identifier).await?,
    }
    .ok_or_else(invalid_credentials)?;

    // 2. Verify bcrypt password
    let password_ok = bcrypt::verify(&req.password, &user.password_hash).unwrap_or(false);
    if !password_ok {
        return Err(invalid_credentials());
    }

    // 3. Generate JWT
    let jwt = encode_jwt(user.id, &auth_config.jwt_secret, auth_config.jwt_expiry_secs)
        .map_err(AppError::Internal)?;

    Ok(Json(AuthTokenResponse {
        jwt,
        user: UserResponse::from(user),
    }))
}

/// POST /api/auth/local/register — Create a new account.
///
/// Only available when `allow_registration` is true in auth config.
/// Stores the user with a bcrypt-hashed password and returns
/// JWT + user info (auto-login after registration).
pub async fn register(
    State(state): State<RelayState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthTokenResponse>, AppError> {
    let auth_config = state
        .auth_config
        .as_ref()
        .ok_or_else(|| AppError::Forbidden("Authentication not configured".to_string()))?;

    // 1. Check registration is enabled
    if !auth_config.allow_registration {
        return Err(AppError::Forbidden("Registration is disabled".to_string()));
    }

    // 2. Validate input fields
    validate_registration(&req)?;

    // 3. Check username/email uniqueness
    let username_taken = state
        .store
        .get_user_by_username(&req.username)
        .await?
        .is_some();
    let email_taken = state.store.get_user_by_email(&req.email).await?.is_some();
    if username_taken || email_taken {
        return Err(AppError::Conflict(
            "Email or Username are already taken".to_string(),
        ));
    }

    // 4. Hash password with bcrypt
    let password_hash = bcrypt::hash(&req.password, 12)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to hash password: {}", e)))?;

    // 5. Create user
    let user = state
        .store
        .create_user(&req.username, &req.email, &password_hash)
        .await?;

    // 6. Generate JWT (auto-login)
    let jwt = encode_jwt(user.id, &auth_config.jwt_secret, auth_config.jwt_expiry_secs)
        .map_err(AppError::Internal)?;

    Ok(Json(AuthTokenResponse {
        jwt,
        user: UserResponse::from(user),
    }))
}

/// GET /api/users/me — Return the authenticated user's profile.
///
/// Requires the auth middleware: reads Claims from request extensions.
pub async fn me(
    State(state): State<RelayState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UserResponse>, AppError> {
    let user = state
        .store
        .get_user_by_id(claims.id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    Ok(Json(UserResponse::from(user)))
}

/// Validate registration request fields.
fn validate_registration(req: &RegisterRequest) -> Result<(), AppError> {
    let username = req.username.trim();
    if username.is_empty() {
        return Err(AppError::BadRequest("Username is required".to_string()));
    }
    if username.len() < 3 {
        return Err(AppError::BadRequest(
            "Username must be at least 3 characters".to_string(),
        ));
    }

    // Basic email validation (contains @ and a dot after it)
    let email = req.email.trim();
    let valid_email = email
        .split_once('@')
        .map(|(local, domain)| !local.is_empty() && domain.contains('.'))
        .unwrap_or(false);
    if !valid_email {
        return Err(AppError::BadRequest("Invalid email address".to_string()));
    }

    if req.password.len() < 6 {
        return Err(AppError::BadRequest(
            "Password must be at least 6 characters".to_string(),
        ));
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
