//! Gateway server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post, put},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use transit_core::{AuthConfig, Config, CredentialHasher, Role};

use crate::GatewayError;
use crate::auth::{
    AuthError, AuthPipeline, Authenticated, CreateUser, Login, SledUserStore, TokenService,
    UpdateProfile, UserService, UserStore,
};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Port to listen on.
    pub port: u16,
    /// Bind address.
    pub bind_address: String,
    /// Enable permissive CORS.
    pub cors: bool,
    /// Data directory for the user database.
    pub data_dir: PathBuf,
    /// Token and hashing configuration.
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for GatewayConfig {
    fn from(config: &Config) -> Self {
        Self {
            port: config.server.port,
            bind_address: config.server.bind_address.clone(),
            cors: config.server.cors,
            data_dir: config.server.data_dir(),
            auth: config.auth.clone(),
        }
    }
}

/// State shared by all handlers. Immutable after startup.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Account operations.
    pub users: Arc<UserService>,
    /// Token verification for the auth gates.
    pub tokens: Arc<TokenService>,
}

impl AppState {
    /// Create handler state from a user service.
    #[must_use]
    pub fn new(users: Arc<UserService>) -> Self {
        let tokens = Arc::clone(users.tokens());
        Self { users, tokens }
    }
}

/// Build the HTTP router.
///
/// Public routes: `GET /health`, `POST /api/users/register`,
/// `POST /api/users/login`. Profile routes require a valid token and role
/// changes additionally require the admin role.
pub fn router(state: AppState, cors: bool) -> Router {
    let public = Router::new()
        .route("/register", post(register_handler))
        .route("/login", post(login_handler));

    let authenticated = AuthPipeline::new(Arc::clone(&state.tokens)).protect(
        Router::new().route("/profile", get(profile_handler).put(update_profile_handler)),
    );

    let admin = AuthPipeline::new(Arc::clone(&state.tokens))
        .allow_roles([Role::Admin])
        .protect(Router::new().route("/{id}/role", put(set_role_handler)));

    let app = Router::new()
        .route("/health", get(health_handler))
        .nest("/api/users", public.merge(authenticated).merge(admin))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Gateway server.
pub struct Gateway {
    config: GatewayConfig,
    state: AppState,
}

/// Builder for constructing a Gateway with its dependencies.
pub struct GatewayBuilder {
    config: GatewayConfig,
    store: Option<Arc<dyn UserStore>>,
    tokens: Option<Arc<TokenService>>,
}

impl GatewayBuilder {
    /// Create a new builder with default config.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: GatewayConfig::default(),
            store: None,
            tokens: None,
        }
    }

    /// Set gateway configuration.
    #[must_use]
    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an existing user store instead of opening one in the data dir.
    #[must_use]
    pub fn with_user_store(mut self, store: Arc<dyn UserStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use an existing token service.
    #[must_use]
    pub fn with_token_service(mut self, tokens: Arc<TokenService>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Build the gateway.
    ///
    /// # Errors
    ///
    /// Returns error if the signing secret is missing, the hashing
    /// parameters are invalid, or the user store cannot be opened.
    pub fn build(self) -> Result<Gateway, GatewayError> {
        let tokens = match self.tokens {
            Some(tokens) => tokens,
            None => Arc::new(
                TokenService::from_config(&self.config.auth)
                    .map_err(|e| GatewayError::Config(format!("Token service init failed: {e}")))?,
            ),
        };

        let hasher = Arc::new(
            CredentialHasher::new(&self.config.auth.hashing)
                .map_err(|e| GatewayError::Config(format!("Invalid hashing parameters: {e}")))?,
        );

        let store = match self.store {
            Some(store) => store,
            None => {
                std::fs::create_dir_all(&self.config.data_dir).map_err(|e| {
                    GatewayError::Config(format!("Failed to create data dir: {e}"))
                })?;
                let store = SledUserStore::open(&self.config.data_dir)
                    .map_err(|e| GatewayError::Server(format!("Failed to open user store: {e}")))?;
                Arc::new(store) as Arc<dyn UserStore>
            }
        };

        let users = Arc::new(UserService::new(store, tokens, hasher));

        Ok(Gateway {
            config: self.config,
            state: AppState::new(users),
        })
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Gateway {
    /// Create a gateway with the default store in `config.data_dir`.
    ///
    /// # Errors
    ///
    /// See [`GatewayBuilder::build`].
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        GatewayBuilder::new().with_config(config).build()
    }

    /// Handler state.
    #[must_use]
    pub const fn state(&self) -> &AppState {
        &self.state
    }

    /// The router this gateway serves.
    #[must_use]
    pub fn router(&self) -> Router {
        router(self.state.clone(), self.config.cors)
    }

    /// Run the gateway server until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns error if the address is invalid or the listener fails.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| GatewayError::Config(format!("Invalid address: {e}")))?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("User service listening on http://{}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| GatewayError::Server(e.to_string()))?;

        tracing::info!("User service stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn health_handler() -> &'static str {
    "User Service is running"
}

/// Unwrap a JSON body, answering malformed input with a 400 `{message}`.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AuthError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| AuthError::Validation(rejection.body_text()))
}

async fn register_handler(
    State(state): State<AppState>,
    payload: Result<Json<CreateUser>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AuthError> {
    let user = state.users.register(json_body(payload)?).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "User registered successfully",
            "user": {
                "id": user.id,
                "email": user.email,
                "name": user.name,
            },
        })),
    ))
}

async fn login_handler(
    State(state): State<AppState>,
    payload: Result<Json<Login>, JsonRejection>,
) -> Result<Json<Value>, AuthError> {
    let result = state.users.login(json_body(payload)?).await?;

    Ok(Json(json!({
        "message": "Login successful",
        "token": result.tokens.access_token,
        "refreshToken": result.tokens.refresh_token,
        "user": {
            "id": result.user.id,
            "email": result.user.email,
            "name": result.user.name,
            "role": result.user.role,
        },
    })))
}

async fn profile_handler(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
) -> Result<Json<Value>, AuthError> {
    let user = state.users.profile(&identity.user_id).await?;

    Ok(Json(json!({
        "message": "User profile fetched successfully",
        "success": true,
        "user": user,
    })))
}

async fn update_profile_handler(
    State(state): State<AppState>,
    Authenticated(identity): Authenticated,
    payload: Result<Json<UpdateProfile>, JsonRejection>,
) -> Result<Json<Value>, AuthError> {
    let user = state
        .users
        .update_profile(&identity.user_id, json_body(payload)?)
        .await?;

    Ok(Json(json!({
        "message": "Profile updated successfully",
        "user": user,
    })))
}

#[derive(Debug, Deserialize)]
struct SetRoleRequest {
    role: Role,
}

async fn set_role_handler(
    State(state): State<AppState>,
    Authenticated(admin): Authenticated,
    Path(user_id): Path<String>,
    payload: Result<Json<SetRoleRequest>, JsonRejection>,
) -> Result<Json<Value>, AuthError> {
    let SetRoleRequest { role } = json_body(payload)?;
    let user = state.users.set_role(&user_id, role).await?;
    tracing::info!(admin = %admin.user_id, user_id = %user.id, "Role changed by admin");

    Ok(Json(json!({
        "message": "Role updated successfully",
        "user": user,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, header};
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;
    use transit_core::{HashingConfig, SigningSecret};

    fn test_state(dir: &TempDir) -> AppState {
        let secret = SigningSecret::new("server-test-secret").unwrap();
        let tokens = Arc::new(TokenService::new(
            &secret,
            Duration::from_secs(3600),
            Duration::from_secs(86_400),
        ));
        let config = GatewayConfig {
            data_dir: dir.path().to_path_buf(),
            auth: AuthConfig::builder()
                .hashing(HashingConfig {
                    memory_kib: 1024,
                    iterations: 1,
                    parallelism: 1,
                })
                .build(),
            ..GatewayConfig::default()
        };

        GatewayBuilder::new()
            .with_config(config)
            .with_token_service(tokens)
            .build()
            .unwrap()
            .state()
            .clone()
    }

    async fn call(
        state: &AppState,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = router(state.clone(), false)
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    async fn register(state: &AppState, email: &str) -> Value {
        let (status, body) = call(
            state,
            Method::POST,
            "/api/users/register",
            None,
            Some(json!({"name": "Rider", "email": email, "password": "Valid1!x"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body
    }

    async fn login_token(state: &AppState, email: &str) -> String {
        let (status, body) = call(
            state,
            Method::POST,
            "/api/users/login",
            None,
            Some(json!({"email": email, "password": "Valid1!x"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let (status, body) = call(&state, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Value::String("User Service is running".to_string()));
    }

    #[tokio::test]
    async fn test_register_response_shape() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let body = register(&state, "ada@example.com").await;
        assert_eq!(body["message"], "User registered successfully");
        assert_eq!(body["user"]["email"], "ada@example.com");
        assert_eq!(body["user"]["name"], "Rider");
        assert!(body["user"]["id"].is_string());
        assert!(body["user"].get("passwordHash").is_none());
    }

    #[tokio::test]
    async fn test_register_errors() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        register(&state, "ada@example.com").await;

        let (status, body) = call(
            &state,
            Method::POST,
            "/api/users/register",
            None,
            Some(json!({"name": "Again", "email": "ada@example.com", "password": "Valid1!x"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"message": "User already exists"}));

        let (status, body) = call(
            &state,
            Method::POST,
            "/api/users/register",
            None,
            Some(json!({"name": "Weak", "email": "weak@example.com", "password": "short1!"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().starts_with("Password must be"));

        let (status, body) = call(
            &state,
            Method::POST,
            "/api/users/register",
            None,
            Some(json!({"email": "missing-fields@example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn test_login_and_profile() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        register(&state, "ada@example.com").await;

        let (status, body) = call(
            &state,
            Method::POST,
            "/api/users/login",
            None,
            Some(json!({"email": "ada@example.com", "password": "Valid1!x"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Login successful");
        assert_eq!(body["user"]["role"], "passenger");
        assert!(body["refreshToken"].is_string());

        let token = body["token"].as_str().unwrap();
        let (status, body) =
            call(&state, Method::GET, "/api/users/profile", Some(token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["user"]["email"], "ada@example.com");

        let (status, body) = call(
            &state,
            Method::PUT,
            "/api/users/profile",
            Some(token),
            Some(json!({"name": "Ada L", "contactNumber": "555-0101"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Profile updated successfully");
        assert_eq!(body["user"]["name"], "Ada L");
        assert_eq!(body["user"]["contactNumber"], "555-0101");
    }

    #[tokio::test]
    async fn test_login_wrong_password() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        register(&state, "ada@example.com").await;

        let (status, body) = call(
            &state,
            Method::POST,
            "/api/users/login",
            None,
            Some(json!({"email": "ada@example.com", "password": "Wrong1!x"})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"message": "Invalid credentials"}));
    }

    #[tokio::test]
    async fn test_profile_requires_token() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let (status, body) = call(&state, Method::GET, "/api/users/profile", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"message": "No token provided"}));

        let (status, body) =
            call(&state, Method::GET, "/api/users/profile", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"message": "Invalid token"}));
    }

    #[tokio::test]
    async fn test_role_change_requires_admin() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let rider = register(&state, "rider@example.com").await;
        let rider_id = rider["user"]["id"].as_str().unwrap().to_string();
        let rider_token = login_token(&state, "rider@example.com").await;

        let uri = format!("/api/users/{rider_id}/role");
        let (status, body) = call(
            &state,
            Method::PUT,
            &uri,
            Some(&rider_token),
            Some(json!({"role": "admin"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, json!({"message": "Insufficient permissions"}));

        state
            .users
            .create_user(
                CreateUser {
                    name: "Admin".to_string(),
                    email: "admin@example.com".to_string(),
                    password: "Valid1!x".to_string(),
                    role: None,
                    contact_number: None,
                },
                Role::Admin,
            )
            .await
            .unwrap();
        let admin_token = login_token(&state, "admin@example.com").await;

        let (status, body) = call(
            &state,
            Method::PUT,
            &uri,
            Some(&admin_token),
            Some(json!({"role": "staff"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Role updated successfully");
        assert_eq!(body["user"]["role"], "staff");

        let (status, body) = call(
            &state,
            Method::PUT,
            "/api/users/000000000000000000000000/role",
            Some(&admin_token),
            Some(json!({"role": "staff"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"message": "User not found"}));
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_gated() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);

        let (status, _) = call(&state, Method::GET, "/api/users/nope/extra/path", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_gateway_requires_secret() {
        let dir = TempDir::new().unwrap();
        let config = GatewayConfig {
            data_dir: dir.path().to_path_buf(),
            auth: AuthConfig::default(),
            ..GatewayConfig::default()
        };

        let err = Gateway::new(config).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }
}
