use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::http::ApiError;

/// Identity attached to every request. The gateway in front of this
/// service authenticates users and forwards `x-user-id` and
/// `x-user-role`; requests without an identity are rejected here.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub is_admin: bool,
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .ok_or(ApiError::Unauthorized)?;
        let is_admin = parts
            .headers
            .get("x-user-role")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|r| r.eq_ignore_ascii_case("admin"));
        Ok(Caller { user_id, is_admin })
    }
}
