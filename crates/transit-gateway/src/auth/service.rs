//! User registration, login, and profile management.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use transit_core::password::DEFAULT_GENERATED_LENGTH;
use transit_core::{CredentialHasher, Role, generate_random_password, meets_strength_policy};
use validator::{Validate, ValidationErrors};
use zeroize::Zeroizing;

use super::AuthError;
use super::jwt::{TokenPair, TokenService};
use super::users::{CredentialRecord, PublicUser, UserPatch, UserStore};

/// Registration request.
#[derive(Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    /// Display name.
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    pub name: String,
    /// Login email.
    #[validate(email(message = "A valid email address is required"))]
    pub email: String,
    /// Plaintext password.
    pub password: String,
    /// Requested role. Ignored by self-registration.
    #[serde(default)]
    pub role: Option<Role>,
    /// Optional contact number.
    #[serde(default)]
    #[validate(length(max = 32, message = "Contact number is too long"))]
    pub contact_number: Option<String>,
}

impl std::fmt::Debug for CreateUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateUser")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Login request.
#[derive(Clone, Deserialize)]
pub struct Login {
    /// Login email.
    pub email: String,
    /// Plaintext password.
    pub password: String,
}

impl std::fmt::Debug for Login {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Login")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Profile update request. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfile {
    /// New display name.
    #[validate(length(min = 1, max = 100, message = "Name cannot be empty"))]
    pub name: Option<String>,
    /// New contact number.
    #[validate(length(max = 32, message = "Contact number is too long"))]
    pub contact_number: Option<String>,
}

/// Password reset request.
///
/// Accepted shape only; there is no reset flow behind it.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PasswordResetRequest {
    /// Account email.
    #[validate(email)]
    pub email: String,
}

/// Successful login.
#[derive(Debug, Clone, Serialize)]
pub struct LoginResult {
    /// Issued access and refresh tokens.
    pub tokens: TokenPair,
    /// The logged-in user.
    pub user: PublicUser,
}

/// User account operations over a [`UserStore`].
#[derive(Clone)]
pub struct UserService {
    store: Arc<dyn UserStore>,
    tokens: Arc<TokenService>,
    hasher: Arc<CredentialHasher>,
    /// Hash checked against when the login email is unknown, so both
    /// failure paths pay for one Argon2 run.
    dummy_hash: Arc<OnceCell<String>>,
}

impl UserService {
    /// Create a user service.
    #[must_use]
    pub fn new(
        store: Arc<dyn UserStore>,
        tokens: Arc<TokenService>,
        hasher: Arc<CredentialHasher>,
    ) -> Self {
        Self {
            store,
            tokens,
            hasher,
            dummy_hash: Arc::new(OnceCell::new()),
        }
    }

    /// Token service used for login.
    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenService> {
        &self.tokens
    }

    /// Self-registration. New accounts are always passengers.
    ///
    /// # Errors
    ///
    /// `Validation` or `WeakPassword` for bad input, `UserExists` if the
    /// email is taken.
    pub async fn register(&self, input: CreateUser) -> Result<PublicUser, AuthError> {
        if input.role.is_some_and(|role| role != Role::Passenger) {
            tracing::debug!(requested = ?input.role, "Ignoring role on self-registration");
        }
        self.create_user(input, Role::Passenger).await
    }

    /// Create a user with an explicit role.
    ///
    /// # Errors
    ///
    /// Same as [`Self::register`].
    pub async fn create_user(
        &self,
        mut input: CreateUser,
        role: Role,
    ) -> Result<PublicUser, AuthError> {
        input.email = normalize_email(&input.email);
        input.name = input.name.trim().to_string();
        input
            .validate()
            .map_err(|e| AuthError::Validation(validation_message(&e)))?;

        let CreateUser {
            name,
            email,
            password,
            contact_number,
            ..
        } = input;
        let password = Zeroizing::new(password);

        if !meets_strength_policy(&password) {
            return Err(AuthError::WeakPassword);
        }

        if self.store.find_by_email(&email).await?.is_some() {
            return Err(AuthError::UserExists);
        }

        let password_hash = self.hash_password(password).await?;

        let mut record = CredentialRecord::new(name, email, password_hash, role);
        record.contact_number = contact_number;

        let saved = self.store.save(record).await?;
        tracing::info!(user_id = %saved.id, role = %saved.role, "User registered");

        Ok(saved.to_public())
    }

    /// Check credentials and issue tokens.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials` for an unknown email or a wrong password.
    pub async fn login(&self, input: Login) -> Result<LoginResult, AuthError> {
        let Login { email, password } = input;
        let password = Zeroizing::new(password);
        let email = normalize_email(&email);

        let Some(record) = self.store.find_by_email(&email).await? else {
            let dummy = self.dummy_hash().await?;
            self.verify_password(password, dummy).await?;
            tracing::warn!("Login failed: unknown account");
            return Err(AuthError::InvalidCredentials);
        };

        if !self
            .verify_password(password, record.password_hash.clone())
            .await?
        {
            tracing::warn!(user_id = %record.id, "Login failed: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let tokens = self.tokens.issue_pair(&record.identity())?;
        tracing::info!(user_id = %record.id, "User logged in");

        Ok(LoginResult {
            tokens,
            user: record.to_public(),
        })
    }

    /// Fetch a user's profile.
    ///
    /// # Errors
    ///
    /// `UserNotFound` if the ID is unknown.
    pub async fn profile(&self, user_id: &str) -> Result<PublicUser, AuthError> {
        self.store
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    /// Update name and/or contact number.
    ///
    /// # Errors
    ///
    /// `Validation` for bad input, `UserNotFound` if the ID is unknown.
    pub async fn update_profile(
        &self,
        user_id: &str,
        mut input: UpdateProfile,
    ) -> Result<PublicUser, AuthError> {
        input.name = input.name.map(|name| name.trim().to_string());
        input
            .validate()
            .map_err(|e| AuthError::Validation(validation_message(&e)))?;

        let patch = UserPatch {
            name: input.name,
            contact_number: input.contact_number,
            role: None,
        };

        self.store
            .update_by_id(user_id, patch)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    /// Change a user's role.
    ///
    /// # Errors
    ///
    /// `UserNotFound` if the ID is unknown.
    pub async fn set_role(&self, user_id: &str, role: Role) -> Result<PublicUser, AuthError> {
        let patch = UserPatch {
            role: Some(role),
            ..UserPatch::default()
        };

        let user = self
            .store
            .update_by_id(user_id, patch)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        tracing::info!(user_id = %user.id, role = %user.role, "Role updated");
        Ok(user)
    }

    async fn dummy_hash(&self) -> Result<String, AuthError> {
        self.dummy_hash
            .get_or_try_init(|| {
                let password = generate_random_password(DEFAULT_GENERATED_LENGTH);
                self.hash_password(Zeroizing::new(password))
            })
            .await
            .cloned()
    }

    async fn hash_password(&self, password: Zeroizing<String>) -> Result<String, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| AuthError::HashingFailure(format!("Hashing task failed: {e}")))?
            .map_err(AuthError::from)
    }

    async fn verify_password(
        &self,
        password: Zeroizing<String>,
        hash: String,
    ) -> Result<bool, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || hasher.verify(&password, &hash))
            .await
            .map_err(|e| AuthError::HashingFailure(format!("Verification task failed: {e}")))?
            .map_err(AuthError::from)
    }
}

impl std::fmt::Debug for UserService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserService")
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// First field message, in field-name order so the result is stable.
fn validation_message(errors: &ValidationErrors) -> String {
    let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
    fields.sort_by(|a, b| a.0.cmp(&b.0));

    fields
        .into_iter()
        .flat_map(|(field, errs)| errs.iter().map(move |e| (field.clone(), e)))
        .map(|(field, e)| {
            e.message
                .as_ref()
                .map_or_else(|| format!("Invalid {field}"), ToString::to_string)
        })
        .next()
        .unwrap_or_else(|| "Invalid request".to_string())
}
