//! Authentication and authorization gates for axum.
//!
//! Protected routes go through two stages, always in this order:
//!
//! 1. [`require_auth`] turns the `Authorization: Bearer <token>` header into a
//!    verified [`Identity`] stored in the request extensions.
//! 2. [`require_roles`] checks that identity against the route's allow-list.
//!
//! [`AuthPipeline`] applies both to a router so the order cannot be mixed up.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Request, State},
    http::{HeaderValue, StatusCode, header::AUTHORIZATION, request::Parts},
    middleware::{Next, from_fn_with_state},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use transit_core::{Identity, Role};

use super::AuthError;
use super::jwt::TokenService;

/// Authorization scheme prefix, including the separating space.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Message returned in place of internal error details.
const INTERNAL_ERROR_MESSAGE: &str = "An unexpected error occurred";

/// Pull the bearer token out of an `Authorization` header value.
///
/// # Errors
///
/// `MissingToken` if the header is absent or does not use the `Bearer`
/// scheme, `Unauthorized` if the value is not a readable string.
pub fn extract_bearer(header: Option<&HeaderValue>) -> Result<&str, AuthError> {
    let value = header.ok_or(AuthError::MissingToken)?;
    let value = value.to_str().map_err(|_| AuthError::Unauthorized)?;

    value
        .strip_prefix(BEARER_PREFIX)
        .ok_or(AuthError::MissingToken)
}

/// Resolve an `Authorization` header to a verified identity.
///
/// # Errors
///
/// Returns the rejection the authentication gate would answer with.
pub fn authenticate(
    tokens: &TokenService,
    header: Option<&HeaderValue>,
) -> Result<Identity, AuthError> {
    let token = extract_bearer(header)?;
    Ok(tokens.verify(token)?)
}

/// Authentication gate.
///
/// On success the verified [`Identity`] is inserted into the request
/// extensions and the request is passed on.
///
/// # Errors
///
/// Rejects with 401 when the token is absent, expired or invalid.
pub async fn require_auth(
    State(tokens): State<Arc<TokenService>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let identity = authenticate(&tokens, request.headers().get(AUTHORIZATION)).inspect_err(|e| {
        tracing::debug!(path = %request.uri().path(), reason = %e, "Authentication rejected");
    })?;

    tracing::debug!(user_id = %identity.user_id, role = %identity.role, "Authenticated");
    request.extensions_mut().insert(identity);

    Ok(next.run(request).await)
}

/// Per-route role allow-list.
#[derive(Debug, Clone)]
pub struct RoleGate {
    allowed: Arc<[Role]>,
}

impl RoleGate {
    /// Create a gate that admits the given roles.
    pub fn new(allowed: impl IntoIterator<Item = Role>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    /// Roles admitted by this gate.
    #[must_use]
    pub fn allowed(&self) -> &[Role] {
        &self.allowed
    }

    /// Decide whether an identity may pass.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` without an identity, `Forbidden` when its role is
    /// not on the list.
    pub fn check(&self, identity: Option<&Identity>) -> Result<(), AuthError> {
        let identity = identity.ok_or(AuthError::NotAuthenticated)?;

        if identity.has_any_role(&self.allowed) {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }
}

/// Authorization gate.
///
/// Must run after [`require_auth`].
///
/// # Errors
///
/// 401 if no identity was attached, 403 if the role is not allowed.
pub async fn require_roles(
    State(gate): State<RoleGate>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let identity = request.extensions().get::<Identity>();
    gate.check(identity).inspect_err(|e| {
        tracing::debug!(
            user_id = identity.map(|i| i.user_id.as_str()),
            allowed = ?gate.allowed(),
            reason = %e,
            "Authorization rejected"
        );
    })?;

    Ok(next.run(request).await)
}

/// Ordered gate pipeline for a group of routes.
#[derive(Debug, Clone)]
pub struct AuthPipeline {
    tokens: Arc<TokenService>,
    roles: Option<RoleGate>,
}

impl AuthPipeline {
    /// Authentication only.
    #[must_use]
    pub const fn new(tokens: Arc<TokenService>) -> Self {
        Self {
            tokens,
            roles: None,
        }
    }

    /// Add the authorization stage with an allow-list of roles.
    #[must_use]
    pub fn allow_roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.roles = Some(RoleGate::new(roles));
        self
    }

    /// Wrap every route of `router` with the pipeline.
    ///
    /// Uses `route_layer`, so unmatched paths still answer 404 rather than 401.
    pub fn protect<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        // Layers added later run first: authorization goes on before authentication
        let router = match self.roles {
            Some(gate) => router.route_layer(from_fn_with_state(gate, require_roles)),
            None => router,
        };

        router.route_layer(from_fn_with_state(self.tokens, require_auth))
    }
}

/// Extractor for the identity attached by [`require_auth`].
#[derive(Debug, Clone)]
pub struct Authenticated(pub Identity);

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .map(Self)
            .ok_or(AuthError::NotAuthenticated)
    }
}

/// Error body for rejected requests.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
}

impl AuthError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Configuration(_)
            | Self::HashingFailure(_)
            | Self::TokenSigning(_)
            | Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::MissingToken
            | Self::TokenExpired
            | Self::TokenInvalid
            | Self::Unauthorized
            | Self::NotAuthenticated
            | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::UserNotFound => StatusCode::NOT_FOUND,
            Self::UserExists | Self::WeakPassword | Self::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = if self.is_internal() {
            tracing::error!(error = %self, "Request failed");
            INTERNAL_ERROR_MESSAGE.to_string()
        } else {
            self.to_string()
        };

        (status, Json(ErrorResponse { message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::get};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tower::ServiceExt;
    use transit_core::SigningSecret;

    use crate::auth::TokenKind;

    fn token_service() -> Arc<TokenService> {
        let secret = SigningSecret::new("middleware-test-secret").unwrap();
        Arc::new(TokenService::new(
            &secret,
            Duration::from_secs(3600),
            Duration::from_secs(7200),
        ))
    }

    async fn whoami(Authenticated(identity): Authenticated) -> Json<Identity> {
        Json(identity)
    }

    fn app(pipeline: AuthPipeline) -> Router {
        pipeline.protect(Router::new().route("/whoami", get(whoami)))
    }

    async fn send(app: Router, authorization: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut builder = axum::http::Request::builder().uri("/whoami");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        let response = app
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn bearer(tokens: &TokenService, user_id: &str, role: Role) -> String {
        let issued = tokens
            .issue(&Identity::new(user_id, role), TokenKind::Access)
            .unwrap();
        format!("{BEARER_PREFIX}{}", issued.token)
    }

    #[tokio::test]
    async fn test_valid_token_attaches_identity() {
        let tokens = token_service();
        let auth = bearer(&tokens, "u1", Role::Admin);

        let (status, body) = send(app(AuthPipeline::new(tokens)), Some(&auth)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"userId": "u1", "role": "admin"}));
    }

    #[tokio::test]
    async fn test_missing_header() {
        let (status, body) = send(app(AuthPipeline::new(token_service())), None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, serde_json::json!({"message": "No token provided"}));
    }

    #[tokio::test]
    async fn test_wrong_scheme() {
        let tokens = token_service();
        let issued = tokens
            .issue(&Identity::new("u1", Role::Admin), TokenKind::Access)
            .unwrap();

        for header in [
            issued.token.clone(),
            format!("Basic {}", issued.token),
            format!("bearer {}", issued.token),
        ] {
            let (status, body) = send(app(AuthPipeline::new(tokens.clone())), Some(&header)).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["message"], "No token provided");
        }
    }

    #[tokio::test]
    async fn test_garbage_token() {
        let (status, body) = send(
            app(AuthPipeline::new(token_service())),
            Some("Bearer not.a.token"),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, serde_json::json!({"message": "Invalid token"}));
    }

    #[tokio::test]
    async fn test_expired_token() {
        let tokens = token_service();
        let issued = tokens
            .issue_at(&Identity::new("u1", Role::Staff), TokenKind::Access, 1_000)
            .unwrap();

        let (status, body) = send(
            app(AuthPipeline::new(tokens)),
            Some(&format!("Bearer {}", issued.token)),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, serde_json::json!({"message": "Token expired"}));
    }

    #[tokio::test]
    async fn test_role_forbidden() {
        let tokens = token_service();
        let auth = bearer(&tokens, "u2", Role::Passenger);

        let pipeline = AuthPipeline::new(tokens).allow_roles([Role::Admin]);
        let (status, body) = send(app(pipeline), Some(&auth)).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, serde_json::json!({"message": "Insufficient permissions"}));
    }

    #[tokio::test]
    async fn test_role_allowed() {
        let tokens = token_service();
        let auth = bearer(&tokens, "s1", Role::Staff);

        let pipeline = AuthPipeline::new(tokens).allow_roles([Role::Admin, Role::Staff]);
        let (status, body) = send(app(pipeline), Some(&auth)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "staff");
    }

    #[tokio::test]
    async fn test_authn_runs_before_authz() {
        let pipeline = AuthPipeline::new(token_service()).allow_roles([Role::Admin]);
        let (status, body) = send(app(pipeline), None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "No token provided");
    }

    #[tokio::test]
    async fn test_authz_without_authn() {
        let app = Router::new()
            .route("/whoami", get(whoami))
            .route_layer(from_fn_with_state(RoleGate::new([Role::Admin]), require_roles));

        let (status, body) = send(app, None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, serde_json::json!({"message": "Not authenticated"}));
    }

    #[test]
    fn test_extract_bearer() {
        let header = HeaderValue::from_static("Bearer abc.def.ghi");
        assert_eq!(extract_bearer(Some(&header)).unwrap(), "abc.def.ghi");

        assert!(matches!(extract_bearer(None), Err(AuthError::MissingToken)));

        let header = HeaderValue::from_static("Token abc");
        assert!(matches!(
            extract_bearer(Some(&header)),
            Err(AuthError::MissingToken)
        ));

        let header = HeaderValue::from_bytes(b"Bearer \xfftoken").unwrap();
        assert!(matches!(
            extract_bearer(Some(&header)),
            Err(AuthError::Unauthorized)
        ));
    }

    #[test]
    fn test_role_gate() {
        let gate = RoleGate::new([Role::Admin]);
        let admin = Identity::new("a", Role::Admin);
        let passenger = Identity::new("p", Role::Passenger);

        assert!(gate.check(Some(&admin)).is_ok());
        assert!(matches!(gate.check(Some(&passenger)), Err(AuthError::Forbidden)));
        assert!(matches!(gate.check(None), Err(AuthError::NotAuthenticated)));
        assert_eq!(gate.allowed(), &[Role::Admin]);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AuthError::MissingToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(AuthError::UserExists.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::UserNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AuthError::Storage("disk full".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_internal_error_is_not_exposed() {
        let response = AuthError::Storage("sled: corrupted page 17".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({"message": "An unexpected error occurred"}));
    }
}
