use axum::{
    async_trait,
    extract::FromRequestParts,
    headers::{authorization::Bearer, Authorization},
    http::{request::Parts, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
    RequestPartsExt, TypedHeader,
};
use serde::Serialize;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::jwt::{validate_token, Claims, Role};

/// Authenticated user information
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
    pub device_id: Option<String>,
}

impl AuthUser {
    pub fn from_claims(claims: Claims) -> Option<Self> {
        let user_id = Uuid::parse_str(&claims.sub).ok()?;
        Some(Self {
            user_id,
            role: claims.role,
            device_id: claims.device,
        })
    }

    /// Verify a raw token (e.g. from a WebSocket query string).
    pub fn from_token(token: &str) -> Option<Self> {
        match validate_token(token) {
            Ok(claims) => Self::from_claims(claims),
            Err(e) => {
                warn!("Token validation failed: {}", e);
                None
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct AuthErrorResponse {
    error: String,
}

fn reject(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(AuthErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Authentication middleware to protect routes
pub async fn auth_middleware<B>(req: Request<B>, next: Next<B>) -> Result<Response, Response> {
    let (mut parts, body) = req.into_parts();

    let TypedHeader(Authorization(bearer)) = parts
        .extract::<TypedHeader<Authorization<Bearer>>>()
        .await
        .map_err(|e| {
            error!("Authorization header extraction failed: {:?}", e);
            reject(
                StatusCode::UNAUTHORIZED,
                "Missing or invalid Authorization header. Please provide a Bearer token",
            )
        })?;

    let claims = validate_token(bearer.token()).map_err(|e| {
        error!("Token validation failed: {}", e);
        reject(StatusCode::UNAUTHORIZED, "Invalid token. Please login again")
    })?;

    let auth_user = AuthUser::from_claims(claims).ok_or_else(|| {
        error!("User ID parsing failed");
        reject(StatusCode::UNAUTHORIZED, "Invalid user identifier in token")
    })?;
    debug!(
        "User authenticated: {} with role {:?}",
        auth_user.user_id, auth_user.role
    );

    parts.extensions.insert(auth_user);

    let req = Request::from_parts(parts, body);
    Ok(next.run(req).await)
}

/// Role-based authorization middleware
pub async fn require_role<B>(
    role: Role,
    req: Request<B>,
    next: Next<B>,
) -> Result<Response, Response> {
    let auth_user = match req.extensions().get::<AuthUser>() {
        Some(user) => user.clone(),
        None => {
            error!("AuthUser not found in request extensions");
            return Err(reject(StatusCode::UNAUTHORIZED, "Authentication required"));
        }
    };

    match auth_user.role {
        Role::Admin => {}
        ref r if *r == role => {}
        _ => {
            warn!(
                "Insufficient permissions for user: {} with role {:?}, required role: {:?}",
                auth_user.user_id, auth_user.role, role
            );
            return Err(reject(
                StatusCode::FORBIDDEN,
                &format!("Insufficient permissions. Required role: {:?}", role),
            ));
        }
    }

    Ok(next.run(req).await)
}

/// Extractor for authenticated user
#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "Authentication required"))
    }
}
