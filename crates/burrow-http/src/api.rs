use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use burrow_core::{BurrowError, User, UserCredential, keys_equal, parse_public_key, validate_username};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::AppState;
use crate::auth::AdminUser;

// Response types
#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Failure of an API call, rendered as a JSON `{"error": ...}` body
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<BurrowError> for ApiError {
    fn from(err: BurrowError) -> Self {
        let status = match &err {
            BurrowError::InvalidUsername(_) | BurrowError::InvalidPublicKey(_) => {
                StatusCode::BAD_REQUEST
            }
            BurrowError::UserNotFound(_) | BurrowError::CredentialNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            BurrowError::UserExists(_) | BurrowError::CredentialExists(_) => StatusCode::CONFLICT,
            _ => {
                error!("Admin API storage failure: {}", err);
                return Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error");
            }
        };

        Self::new(status, err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// Request types
#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
}

#[derive(Deserialize)]
pub struct CreateCredentialRequest {
    pub public_key: String,
}

// User handlers
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    let users = state.db.list_users().await?;
    Ok(Json(users.into_iter().map(|u| u.username).collect()))
}

pub async fn create_user(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminUser>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let Json(req) = payload?;
    validate_username(&req.username)?;

    let user = state.db.create_user(&req.username).await?;
    info!(admin = %admin.0, user = %user.username, event = "user_created", "Created user");

    Ok((StatusCode::CREATED, Json(user)))
}

/// Remove a user and every credential registered to them
pub async fn delete_user(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminUser>,
    Path(username): Path<String>,
) -> ApiResult<StatusCode> {
    state.db.delete_user(&username).await?;
    info!(admin = %admin.0, user = %username, event = "user_deleted", "Deleted user");

    Ok(StatusCode::NO_CONTENT)
}

// Credential handlers
pub async fn list_credentials(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<Vec<UserCredential>>> {
    if !state.db.user_exists(&username).await? {
        return Err(BurrowError::UserNotFound(username).into());
    }

    Ok(Json(state.db.list_credentials_for(&username).await?))
}

pub async fn create_credential(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminUser>,
    Path(username): Path<String>,
    payload: Result<Json<CreateCredentialRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<UserCredential>)> {
    let Json(req) = payload?;
    let line = req.public_key.trim();
    let key = parse_public_key(line)?;

    if !state.db.user_exists(&username).await? {
        return Err(BurrowError::UserNotFound(username).into());
    }

    // The same key under a different comment is still a duplicate
    let existing = state.db.list_credentials_for(&username).await?;
    let duplicate = existing.iter().any(|c| {
        parse_public_key(&c.public_key)
            .map(|stored| keys_equal(&stored, &key))
            .unwrap_or(false)
    });
    if duplicate {
        return Err(BurrowError::CredentialExists(username).into());
    }

    let credential = state.db.create_credential(&username, line).await?;
    info!(
        admin = %admin.0,
        user = %username,
        credential_id = credential.id,
        algorithm = %key.algorithm(),
        event = "credential_added",
        "Registered public key"
    );

    Ok((StatusCode::CREATED, Json(credential)))
}

pub async fn delete_credential(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminUser>,
    Path((username, credential_id)): Path<(String, i64)>,
) -> ApiResult<StatusCode> {
    state.db.delete_credential(&username, credential_id).await?;
    info!(
        admin = %admin.0,
        user = %username,
        credential_id,
        event = "credential_removed",
        "Removed public key"
    );

    Ok(StatusCode::NO_CONTENT)
}
