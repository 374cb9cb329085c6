//! Authentication middleware.
//!
//! Tokens are `Bearer {user_id}:{secret}` when `AUTH_SECRET` is configured and
//! `Bearer {user_id}` otherwise. Without a secret, requests with no header are
//! accepted anonymously and carry no user to check against.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Authenticated caller extracted from the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    /// `None` for anonymous access in development mode
    pub user_id: Option<String>,
}

impl AuthUser {
    /// Refuse a mutation submitted on behalf of another user.
    pub fn authorize(&self, user_id: &str) -> Result<(), AppError> {
        match &self.user_id {
            Some(caller) if caller != user_id => Err(AppError::Forbidden(format!(
                "user {caller} cannot submit mutations for {user_id}"
            ))),
            _ => Ok(()),
        }
    }
}

/// Resolve the caller from an optional `Authorization` header value.
pub fn authenticate(header: Option<&str>, secret: Option<&str>) -> Result<AuthUser, AppError> {
    let Some(header) = header else {
        return match secret {
            None => Ok(AuthUser { user_id: None }),
            Some(_) => Err(AppError::Unauthorized),
        };
    };

    let token = header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AppError::Unauthorized)?;

    let user_id = match secret {
        Some(secret) => match token.rsplit_once(':') {
            Some((user_id, presented)) if presented == secret && !user_id.is_empty() => user_id,
            _ => return Err(AppError::Unauthorized),
        },
        None => token,
    };

    Ok(AuthUser {
        user_id: Some(user_id.to_string()),
    })
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        authenticate(header, state.config.auth_secret.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_only_without_secret() {
        let anonymous = authenticate(None, None).unwrap();
        assert_eq!(anonymous.user_id, None);
        assert!(anonymous.authorize("anyone").is_ok());

        assert!(matches!(
            authenticate(None, Some("s3cret")),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn secret_must_match() {
        let user = authenticate(Some("Bearer till-1:s3cret"), Some("s3cret")).unwrap();
        assert_eq!(user.user_id.as_deref(), Some("till-1"));

        assert!(authenticate(Some("Bearer till-1:wrong"), Some("s3cret")).is_err());
        assert!(authenticate(Some("Bearer till-1"), Some("s3cret")).is_err());
        assert!(authenticate(Some("Basic abc"), None).is_err());
        assert!(authenticate(Some("Bearer "), None).is_err());
    }

    #[test]
    fn mismatched_user_is_forbidden() {
        let user = authenticate(Some("Bearer till-1"), None).unwrap();
        assert!(user.authorize("till-1").is_ok());
        assert!(matches!(
            user.authorize("till-2"),
            Err(AppError::Forbidden(_))
        ));
    }
}
