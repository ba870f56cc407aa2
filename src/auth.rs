use axum::{
    extract::{FromRef, FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    AppState,
    config::{AppConfig, Env},
    error::ApiError,
    models::{Role, Status, User},
    repository::RepositoryState,
};

/// Name of the cookie carrying the session token.
pub const TOKEN_COOKIE: &str = "token";

const NOT_AUTHORIZED: &str = "Not authorized to access this route";

/// Claims
///
/// The payload of a session token. Signed with the server secret (HS256) and
/// validated on every authenticated request.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user's id. Used to reload the user on every request.
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    /// Expiration time (seconds since the epoch).
    pub exp: usize,
    /// Issued at (seconds since the epoch).
    pub iat: usize,
}

/// AuthUser Extractor Result
///
/// The resolved identity of an authenticated, gate-passing request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub status: Status,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl From<User> for AuthUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            status: user.status,
        }
    }
}

/// AdminUser
///
/// An `AuthUser` whose role is admin. Rejects everyone else with 403.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

/// AdminRole
///
/// Same gate as `AdminUser`, phrased as a role check. Guards account
/// management under `/api/auth/users`.
#[derive(Debug, Clone)]
pub struct AdminRole(pub AuthUser);

fn require_admin(user: AuthUser, message: &'static str) -> Result<AuthUser, ApiError> {
    if !user.is_admin() {
        tracing::info!(user = %user.email, role = %user.role, "admin permission denied");
        return Err(ApiError::forbidden(message));
    }
    Ok(user)
}

/// issue_token
///
/// Signs a session token for `user`, valid for the configured lifetime.
pub fn issue_token(user: &User, config: &AppConfig) -> Result<String, ApiError> {
    let now = Utc::now().timestamp().max(0) as usize;
    let claims = Claims {
        sub: user.id,
        email: user.email.clone(),
        role: user.role,
        iat: now,
        exp: now.saturating_add(
            usize::try_from(config.jwt_expires_in.as_secs()).unwrap_or(usize::MAX),
        ),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| ApiError::internal("Server error", e))
}

/// hash_password
///
/// bcrypt with the configured cost, on the blocking pool.
pub async fn hash_password(password: String, cost: u32) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| ApiError::internal("Server error", e))?
        .map_err(|e| ApiError::internal("Server error", e))
}

/// verify_password
///
/// A malformed stored hash counts as a mismatch.
pub async fn verify_password(password: String, hash: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
        .await
        .map_err(|e| ApiError::internal("Server error", e))
}

/// session_cookie
///
/// The `Set-Cookie` value delivering a token. `Secure` outside local development.
pub fn session_cookie(token: &str, config: &AppConfig) -> String {
    let secure = if config.env == Env::Production {
        "; Secure"
    } else {
        ""
    };
    format!(
        "{TOKEN_COOKIE}={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{secure}",
        config.jwt_expires_in.as_secs()
    )
}

/// The `Set-Cookie` value that clears the session cookie.
pub fn clear_session_cookie() -> String {
    format!("{TOKEN_COOKIE}=none; HttpOnly; SameSite=Lax; Path=/; Max-Age=0")
}

fn get_cookie_value<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .map(|s| s.trim())
        .find_map(|cookie| {
            let (key, val) = cookie.split_once('=')?;
            (key.trim() == name).then(|| val.trim())
        })
}

/// Bearer header first, then the session cookie.
fn extract_token(parts: &Parts) -> Option<&str> {
    let bearer = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    bearer.or_else(|| get_cookie_value(parts, TOKEN_COOKIE).filter(|token| !token.is_empty()))
}

/// decode_token
///
/// Verifies signature and expiry; an expired token gets its own message.
pub fn decode_token(token: &str, secret: &str) -> Result<Claims, ApiError> {
    let mut validation = Validation::default();
    validation.validate_exp = true;

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => ApiError::unauthorized("Token expired, please login again"),
        _ => ApiError::unauthorized(NOT_AUTHORIZED),
    })
}

/// The approval gate: admins always pass, everyone else must be approved.
fn admit(user: User) -> Result<AuthUser, ApiError> {
    if user.role != Role::Admin && user.status != Status::Approved {
        tracing::info!(user = %user.email, status = %user.status, "rejected unapproved account");
        return Err(ApiError::unauthorized("Your account is not approved"));
    }
    Ok(user.into())
}

/// AuthUser Extractor Implementation
///
/// 1. Reuse: if `auth_middleware` already resolved the user, take it from extensions.
/// 2. Local Bypass: in `Env::Local`, an `x-user-id` header naming an existing user.
/// 3. Token Validation: bearer header or `token` cookie, HS256 with expiry.
/// 4. DB Lookup: the user must still exist, and pass the approval gate.
///
/// Rejection: a 401 envelope on any authentication failure.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        if config.env == Env::Local {
            let bypass_id = parts
                .headers
                .get("x-user-id")
                .and_then(|value| value.to_str().ok())
                .and_then(|id| Uuid::parse_str(id).ok());
            if let Some(user_id) = bypass_id {
                if let Some(user) = repo.get_user(user_id).await? {
                    let user = admit(user)?;
                    parts.extensions.insert(user.clone());
                    return Ok(user);
                }
            }
        }

        let token = extract_token(parts).ok_or_else(|| ApiError::unauthorized(NOT_AUTHORIZED))?;
        let claims = decode_token(token, &config.jwt_secret)?;

        let user = repo
            .get_user(claims.sub)
            .await?
            .ok_or_else(|| ApiError::unauthorized("User not found or not authorized"))?;

        let user = admit(user)?;
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        require_admin(user, "Access denied: admin permission required").map(AdminUser)
    }
}

impl<S> FromRequestParts<S> for AdminRole
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        require_admin(user, "Not authorized. Role 'admin' required.").map(AdminRole)
    }
}

/// auth_middleware
///
/// Guards the protected routes. Resolves `AuthUser` once, stores it in the
/// request extensions for the handler, or short-circuits with the rejection.
pub async fn auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    match AuthUser::from_request_parts(&mut parts, &state).await {
        Ok(_) => next.run(Request::from_parts(parts, body)).await,
        Err(rejection) => rejection.into_response(),
    }
}
