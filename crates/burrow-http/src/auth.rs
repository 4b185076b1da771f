/// Admin access control for the management API
///
/// Requests arrive through an authenticating reverse proxy which names the
/// caller in the `X-Remote-User` header. Only callers listed in
/// `administrative_users` may reach any route.
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use crate::AppState;
use crate::api::ApiError;

pub const REMOTE_USER_HEADER: &str = "x-remote-user";

/// Caller identity passed through request extensions
#[derive(Clone, Debug)]
pub struct AdminUser(pub String);

pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let caller = request
        .headers()
        .get(REMOTE_USER_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);

    let Some(caller) = caller else {
        warn!(
            method = %request.method(),
            path = %request.uri().path(),
            event = "api_unauthenticated",
            "Admin API request without remote user"
        );
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "authentication required"));
    };

    if !state.config.is_administrator(&caller) {
        warn!(
            caller = %caller,
            method = %request.method(),
            path = %request.uri().path(),
            event = "api_forbidden",
            "Admin API request from non-administrator"
        );
        return Err(ApiError::new(StatusCode::FORBIDDEN, "administrator access required"));
    }

    debug!(caller = %caller, path = %request.uri().path(), "Admin API request");
    request.extensions_mut().insert(AdminUser(caller));

    Ok(next.run(request).await)
}
