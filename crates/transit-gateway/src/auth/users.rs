//! User records and storage.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
};
use transit_core::{Identity, Role};

use super::AuthError;

/// Key prefix for the email → id index.
const EMAIL_INDEX_PREFIX: &str = "idx:email:";

/// Stored user account, including the password hash.
///
/// Never returned from HTTP handlers; use [`PublicUser`].
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    /// Unique user ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Login email, unique across users.
    pub email: String,
    /// Argon2 PHC hash of the password.
    pub password_hash: String,
    /// User role.
    pub role: Role,
    /// Optional contact number.
    #[serde(default)]
    pub contact_number: Option<String>,
    /// When the user was created.
    pub created_at: DateTime<Utc>,
    /// When the user was last modified.
    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    /// Create a record with a freshly generated ID.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        password_hash: String,
        role: Role,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: generate_user_id(),
            name: name.into(),
            email: email.into(),
            password_hash,
            role,
            contact_number: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Identity to embed in tokens for this user.
    #[must_use]
    pub fn identity(&self) -> Identity {
        Identity::new(self.id.clone(), self.role)
    }

    /// Create a safe version of the user for API responses (no password hash).
    #[must_use]
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role,
            contact_number: self.contact_number.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn apply(&mut self, patch: UserPatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(contact_number) = patch.contact_number {
            self.contact_number = Some(contact_number);
        }
        if let Some(role) = patch.role {
            self.role = role;
        }
        self.updated_at = Utc::now();
    }
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("password_hash", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Public user representation (for API responses).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    /// Unique user ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Email address.
    pub email: String,
    /// User role.
    pub role: Role,
    /// Contact number.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_number: Option<String>,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When last modified.
    pub updated_at: DateTime<Utc>,
}

/// Partial update applied by [`UserStore::update_by_id`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPatch {
    /// New display name.
    pub name: Option<String>,
    /// New contact number.
    pub contact_number: Option<String>,
    /// New role.
    pub role: Option<Role>,
}

/// Persistence boundary for user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up a full credential record by email.
    async fn find_by_email(&self, email: &str) -> Result<Option<CredentialRecord>, AuthError>;

    /// Look up a user by ID, without the password hash.
    async fn find_by_id(&self, id: &str) -> Result<Option<PublicUser>, AuthError>;

    /// Persist a new record.
    ///
    /// Fails with `AuthError::UserExists` if the email is taken.
    async fn save(&self, record: CredentialRecord) -> Result<CredentialRecord, AuthError>;

    /// Apply a partial update, returning the updated user or `None` if the
    /// ID is unknown.
    async fn update_by_id(
        &self,
        id: &str,
        patch: UserPatch,
    ) -> Result<Option<PublicUser>, AuthError>;
}

/// User store backed by sled.
pub struct SledUserStore {
    tree: sled::Tree,
}

impl SledUserStore {
    /// Open or create a user store in `path`.
    ///
    /// # Errors
    ///
    /// Returns error if database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, AuthError> {
        let db = sled::open(path.join("users"))
            .map_err(|e| AuthError::Storage(format!("Failed to open user database: {e}")))?;
        Self::with_db(&db)
    }

    /// Create a user store over an existing sled database.
    ///
    /// # Errors
    ///
    /// Returns error if tree cannot be opened.
    pub fn with_db(db: &sled::Db) -> Result<Self, AuthError> {
        let tree = db
            .open_tree("users")
            .map_err(|e| AuthError::Storage(format!("Failed to open users tree: {e}")))?;

        Ok(Self { tree })
    }

    /// Count stored users.
    #[must_use]
    pub fn count(&self) -> usize {
        self.tree
            .iter()
            .filter(|r| {
                r.as_ref()
                    .map(|(k, _)| !k.starts_with(EMAIL_INDEX_PREFIX.as_bytes()))
                    .unwrap_or(false)
            })
            .count()
    }

    fn get(&self, id: &str) -> Result<Option<CredentialRecord>, AuthError> {
        self.tree
            .get(id.as_bytes())
            .map_err(|e| AuthError::Storage(format!("Get error: {e}")))?
            .map(|value| decode_record(&value))
            .transpose()
    }

    async fn flush(&self) -> Result<(), AuthError> {
        self.tree
            .flush_async()
            .await
            .map_err(|e| AuthError::Storage(format!("Flush error: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for SledUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<CredentialRecord>, AuthError> {
        let index_key = email_index_key(email);
        match self.tree.get(index_key.as_bytes()) {
            Ok(Some(id_bytes)) => {
                let id = String::from_utf8_lossy(&id_bytes);
                self.get(&id)
            }
            Ok(None) => Ok(None),
            Err(e) => Err(AuthError::Storage(format!("Index lookup error: {e}"))),
        }
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<PublicUser>, AuthError> {
        Ok(self.get(id)?.map(|record| record.to_public()))
    }

    async fn save(&self, record: CredentialRecord) -> Result<CredentialRecord, AuthError> {
        let index_key = email_index_key(&record.email);
        let value = encode_record(&record)?;

        // Index and record commit together, or not at all
        self.tree
            .transaction(|tx| -> ConflictableTransactionResult<(), AuthError> {
                if tx.get(index_key.as_bytes())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(AuthError::UserExists));
                }
                tx.insert(index_key.as_bytes(), record.id.as_bytes())?;
                tx.insert(record.id.as_bytes(), value.as_slice())?;
                Ok(())
            })
            .map_err(transaction_error)?;
        self.flush().await?;

        Ok(record)
    }

    async fn update_by_id(
        &self,
        id: &str,
        patch: UserPatch,
    ) -> Result<Option<PublicUser>, AuthError> {
        let updated = self
            .tree
            .transaction(|tx| -> ConflictableTransactionResult<_, AuthError> {
                let Some(value) = tx.get(id.as_bytes())? else {
                    return Ok(None);
                };
                let mut record =
                    decode_record(&value).map_err(ConflictableTransactionError::Abort)?;
                record.apply(patch.clone());
                let value = encode_record(&record).map_err(ConflictableTransactionError::Abort)?;
                tx.insert(id.as_bytes(), value)?;
                Ok(Some(record.to_public()))
            })
            .map_err(transaction_error)?;

        if updated.is_some() {
            self.flush().await?;
        }
        Ok(updated)
    }
}

impl std::fmt::Debug for SledUserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledUserStore")
            .field("user_count", &self.count())
            .finish()
    }
}

fn email_index_key(email: &str) -> String {
    format!("{EMAIL_INDEX_PREFIX}{email}")
}

fn encode_record(record: &CredentialRecord) -> Result<Vec<u8>, AuthError> {
    serde_json::to_vec(record).map_err(|e| AuthError::Storage(format!("Serialization error: {e}")))
}

fn decode_record(value: &[u8]) -> Result<CredentialRecord, AuthError> {
    serde_json::from_slice(value)
        .map_err(|e| AuthError::Storage(format!("Deserialization error: {e}")))
}

fn transaction_error(error: TransactionError<AuthError>) -> AuthError {
    match error {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => AuthError::Storage(format!("Transaction error: {e}")),
    }
}

/// Generate a random 96-bit hex user ID.
fn generate_user_id() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn record(email: &str, role: Role) -> CredentialRecord {
        CredentialRecord::new("Test User", email, "$argon2id$fake".to_string(), role)
    }

    #[tokio::test]
    async fn test_save_and_find() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledUserStore::open(temp_dir.path()).unwrap();
        assert_eq!(store.count(), 0);

        let saved = store.save(record("a@example.com", Role::Staff)).await.unwrap();
        assert_eq!(store.count(), 1);

        let by_email = store.find_by_email("a@example.com").await.unwrap().unwrap();
        assert_eq!(by_email.id, saved.id);
        assert_eq!(by_email.password_hash, "$argon2id$fake");

        let by_id = store.find_by_id(&saved.id).await.unwrap().unwrap();
        assert_eq!(by_id.email, "a@example.com");
        assert_eq!(by_id.role, Role::Staff);

        assert!(store.find_by_email("b@example.com").await.unwrap().is_none());
        assert!(store.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledUserStore::open(temp_dir.path()).unwrap();

        store.save(record("dup@example.com", Role::Passenger)).await.unwrap();
        let result = store.save(record("dup@example.com", Role::Admin)).await;

        assert!(matches!(result, Err(AuthError::UserExists)));
        assert_eq!(store.count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_save_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledUserStore::open(temp_dir.path()).unwrap();
        let first = store.save(record("dup@example.com", Role::Passenger)).await.unwrap();

        let second = record("dup@example.com", Role::Admin);
        let second_id = second.id.clone();
        assert!(matches!(store.save(second).await, Err(AuthError::UserExists)));

        assert!(store.find_by_id(&second_id).await.unwrap().is_none());
        let owner = store.find_by_email("dup@example.com").await.unwrap().unwrap();
        assert_eq!(owner.id, first.id);
        assert_eq!(owner.role, Role::Passenger);
    }

    #[tokio::test]
    async fn test_update_by_id() {
        let temp_dir = TempDir::new().unwrap();
        let store = SledUserStore::open(temp_dir.path()).unwrap();
        let saved = store.save(record("u@example.com", Role::Passenger)).await.unwrap();

        let patch = UserPatch {
            name: Some("Renamed".to_string()),
            contact_number: Some("+1-555-0100".to_string()),
            role: None,
        };
        let updated = store.update_by_id(&saved.id, patch).await.unwrap().unwrap();
        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.contact_number.as_deref(), Some("+1-555-0100"));
        assert_eq!(updated.role, Role::Passenger);
        assert!(updated.updated_at >= saved.updated_at);

        let promoted = store
            .update_by_id(
                &saved.id,
                UserPatch {
                    role: Some(Role::Admin),
                    ..UserPatch::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(promoted.role, Role::Admin);
        assert_eq!(promoted.name, "Renamed");

        let missing = store.update_by_id("nope", UserPatch::default()).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_keep_every_field() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(SledUserStore::open(temp_dir.path()).unwrap());
        let saved = store.save(record("c@example.com", Role::Passenger)).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            let id = saved.id.clone();
            tasks.push(tokio::spawn(async move {
                let patch = UserPatch {
                    name: Some(format!("Name {i}")),
                    ..UserPatch::default()
                };
                store.update_by_id(&id, patch).await.unwrap();
            }));
        }
        let contact_store = Arc::clone(&store);
        let id = saved.id.clone();
        tasks.push(tokio::spawn(async move {
            let patch = UserPatch {
                contact_number: Some("+1-555-0199".to_string()),
                ..UserPatch::default()
            };
            contact_store.update_by_id(&id, patch).await.unwrap();
        }));
        for task in tasks {
            task.await.unwrap();
        }

        let user = store.find_by_id(&saved.id).await.unwrap().unwrap();
        assert_eq!(user.contact_number.as_deref(), Some("+1-555-0199"));
        assert!(user.name.starts_with("Name "));
    }

    #[test]
    fn test_public_user_hides_hash() {
        let record = record("p@example.com", Role::Passenger);
        let json = serde_json::to_string(&record.to_public()).unwrap();
        assert!(!json.contains("argon2"));
        assert!(!json.contains("password"));

        let debug = format!("{record:?}");
        assert!(!debug.contains("argon2"));
    }

    #[test]
    fn test_generated_ids() {
        let first = generate_user_id();
        assert_eq!(first.len(), 24);
        assert_ne!(first, generate_user_id());
    }
}
