use axum::{
    extract::State,
    http::header::SET_COOKIE,
    response::IntoResponse,
};
use uuid::Uuid;

use super::{ApiJson, ApiPath, non_blank};
use crate::{
    AppState,
    auth::{
        AdminRole, AuthUser, clear_session_cookie, hash_password, issue_token, session_cookie,
        verify_password,
    },
    envelope::Envelope,
    error::{ApiError, ApiResult},
    models::{
        AuthData, LoginRequest, NewUser, RegisterRequest, Role, Status, UpdateProfileRequest,
        UpdateRoleRequest, UpdateStatusRequest, UserData, UsersData,
    },
    repository::RepositoryError,
};

const EMAIL_TAKEN: &str = "User with that email already exists";

/// register
///
/// [Public Route] Creates a `user` account in `pending` status. No token is
/// issued: the account cannot sign in until an admin approves it.
#[utoipa::path(
    post,
    path = "/api/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registered, pending approval", body = AuthData),
        (status = 400, description = "Missing fields or email taken")
    ),
    tag = "auth"
)]
pub async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> ApiResult<Envelope<AuthData>> {
    let (Some(name), Some(email), Some(password)) = (
        non_blank(payload.name),
        non_blank(payload.email),
        payload.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::bad_request(
            "Please provide name, email and password",
        ));
    };
    let email = email.to_lowercase();

    if state.repo.get_user_by_email(&email).await?.is_some() {
        return Err(ApiError::bad_request(EMAIL_TAKEN));
    }

    let password_hash = hash_password(password, state.config.bcrypt_cost).await?;
    let user = state
        .repo
        .create_user(NewUser {
            name,
            email,
            password_hash,
            role: Role::User,
            status: Status::Pending,
        })
        .await
        .map_err(|e| match e {
            RepositoryError::UniqueViolation(_) => ApiError::bad_request(EMAIL_TAKEN),
            other => ApiError::internal("Error registering user", other),
        })?;

    tracing::info!(user_id = %user.id, "user registered, pending approval");

    Ok(Envelope::created(
        AuthData {
            user: user.into(),
            token: None,
        },
        "User registered successfully. Your account is pending approval.",
    ))
}

/// login
///
/// [Public Route] Verifies credentials and issues a session token, returned in
/// the body and as an HTTP-only cookie. The password is checked before the
/// account status so that status is only revealed to its owner.
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthData),
        (status = 401, description = "Invalid credentials or account not approved")
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let (Some(email), Some(password)) = (
        non_blank(payload.email),
        payload.password.filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::bad_request("Please provide email and password"));
    };

    let user = state
        .repo
        .get_user_by_email(&email.to_lowercase())
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    if !verify_password(password, user.password_hash.clone()).await? {
        tracing::info!(user_id = %user.id, "login failed: wrong password");
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    if !user.is_admin() {
        match user.status {
            Status::Pending => {
                return Err(ApiError::unauthorized("Your account is pending approval"));
            }
            Status::Rejected => {
                return Err(ApiError::unauthorized(
                    "Your account has been rejected or suspended",
                ));
            }
            Status::Approved => {}
        }
    }

    let token = issue_token(&user, &state.config)?;
    let cookie = session_cookie(&token, &state.config);
    tracing::info!(user_id = %user.id, "login successful");

    Ok((
        [(SET_COOKIE, cookie)],
        Envelope::ok(
            AuthData {
                user: user.into(),
                token: Some(token),
            },
            "Login successful",
        ),
    ))
}

/// get_profile
///
/// [Authenticated Route] The caller's own profile.
#[utoipa::path(
    get,
    path = "/api/auth/profile",
    responses(
        (status = 200, description = "Profile", body = UserData),
        (status = 401, description = "Not authenticated")
    ),
    tag = "auth"
)]
pub async fn get_profile(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<Envelope<UserData>> {
    let user = state
        .repo
        .get_user(id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Envelope::ok(
        UserData { user: user.into() },
        "User profile fetched successfully",
    ))
}

/// update_profile
///
/// [Authenticated Route] Changes the caller's name and/or email.
#[utoipa::path(
    put,
    path = "/api/auth/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Profile updated", body = UserData),
        (status = 400, description = "Nothing to update or email taken")
    ),
    tag = "auth"
)]
pub async fn update_profile(
    AuthUser { id, .. }: AuthUser,
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<UpdateProfileRequest>,
) -> ApiResult<Envelope<UserData>> {
    let name = non_blank(payload.name);
    let email = non_blank(payload.email).map(|e| e.to_lowercase());
    if name.is_none() && email.is_none() {
        return Err(ApiError::bad_request(
            "Please provide at least one field to update",
        ));
    }

    if let Some(email) = &email {
        if let Some(existing) = state.repo.get_user_by_email(email).await? {
            if existing.id != id {
                return Err(ApiError::bad_request(EMAIL_TAKEN));
            }
        }
    }

    let user = state
        .repo
        .update_profile(id, name, email)
        .await
        .map_err(|e| match e {
            RepositoryError::UniqueViolation(_) => ApiError::bad_request(EMAIL_TAKEN),
            other => ApiError::internal("Error updating profile", other),
        })?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Envelope::ok(
        UserData { user: user.into() },
        "Profile updated successfully",
    ))
}

/// logout
///
/// [Authenticated Route] Expires the session cookie. Bearer tokens stay valid
/// until their `exp`; there is no server-side revocation list.
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses((status = 200, description = "Logged out")),
    tag = "auth"
)]
pub async fn logout(AuthUser { id, .. }: AuthUser) -> impl IntoResponse {
    tracing::debug!(user_id = %id, "logout");
    (
        [(SET_COOKIE, clear_session_cookie())],
        Envelope::message("Logged out successfully"),
    )
}

/// list_users
///
/// [Admin Route] Every account, newest first.
#[utoipa::path(
    get,
    path = "/api/auth/users",
    responses(
        (status = 200, description = "Users", body = UsersData),
        (status = 403, description = "Not an admin")
    ),
    tag = "auth"
)]
pub async fn list_users(
    AdminRole(_admin): AdminRole,
    State(state): State<AppState>,
) -> ApiResult<Envelope<UsersData>> {
    let users = state
        .repo
        .list_users()
        .await
        .map_err(|e| ApiError::internal("Error fetching users", e))?;

    Ok(Envelope::ok(
        UsersData {
            users: users.into_iter().map(Into::into).collect(),
        },
        "Users fetched successfully",
    ))
}

/// update_user_status
///
/// [Admin Route] Approves, rejects or resets an account to pending.
#[utoipa::path(
    put,
    path = "/api/auth/users/{id}/status",
    request_body = UpdateStatusRequest,
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Status updated", body = UserData),
        (status = 400, description = "Invalid status value"),
        (status = 404, description = "User not found")
    ),
    tag = "auth"
)]
pub async fn update_user_status(
    AdminRole(admin): AdminRole,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<UpdateStatusRequest>,
) -> ApiResult<Envelope<UserData>> {
    let status: Status = payload
        .status
        .as_deref()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ApiError::bad_request("Invalid status value"))?;

    let user = state
        .repo
        .set_user_status(id, status)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    tracing::info!(admin_id = %admin.id, user_id = %id, %status, "user status changed");

    let message = match status {
        Status::Approved => "User approved successfully",
        Status::Rejected => "User rejected successfully",
        Status::Pending => "User marked as pending successfully",
    };
    Ok(Envelope::ok(UserData { user: user.into() }, message))
}

/// update_user_role
///
/// [Admin Route] Promotes or demotes an account.
#[utoipa::path(
    put,
    path = "/api/auth/users/{id}/role",
    request_body = UpdateRoleRequest,
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Role updated", body = UserData),
        (status = 400, description = "Invalid role value"),
        (status = 404, description = "User not found")
    ),
    tag = "auth"
)]
pub async fn update_user_role(
    AdminRole(admin): AdminRole,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<UpdateRoleRequest>,
) -> ApiResult<Envelope<UserData>> {
    let role: Role = payload
        .role
        .as_deref()
        .and_then(|r| r.parse().ok())
        .ok_or_else(|| ApiError::bad_request("Invalid role value"))?;

    let user = state
        .repo
        .set_user_role(id, role)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    tracing::info!(admin_id = %admin.id, user_id = %id, %role, "user role changed");

    Ok(Envelope::ok(
        UserData { user: user.into() },
        "User role updated successfully",
    ))
}
