use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::RegisterRequest,
        password::{hash_password, hash_password_async, validate_password, verify_password_async},
    },
    error::{AppError, AppResult},
    users::{
        dto::{CreateUserRequest, UpdateUserRequest},
        repo_types::{NewUser, Role, Status, User, UserChanges},
        store::{StoreError, UserStore},
    },
};

/// Single message for unknown email and wrong password alike.
pub const INVALID_CREDENTIALS: &str = "Invalid email or password";
pub const USER_NOT_FOUND: &str = "User not found";

const DECOY_PASSWORD: &str = "packpal-decoy-credential";

lazy_static! {
    /// Verified against on unknown emails so both login failures cost one
    /// Argon2 verification.
    static ref DECOY_HASH: String = hash_password(DECOY_PASSWORD).unwrap_or_default();
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Path ids that are not UUIDs can never match a record: 400, not 404.
pub fn parse_user_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| AppError::Validation("Invalid user id".into()))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn checked_email(raw: &str) -> AppResult<String> {
    let email = normalize_email(raw);
    if !is_valid_email(&email) {
        warn!(email = %email, "invalid email");
        return Err(AppError::Validation("Invalid email".into()));
    }
    Ok(email)
}

fn checked_name(raw: String, field: &str) -> AppResult<String> {
    non_blank(Some(raw)).ok_or_else(|| AppError::Validation(format!("{field} cannot be empty")))
}

/// Checks, hashes and inserts. The pre-check gives the common case a clean
/// 409; the store's own uniqueness guard covers a racing insert.
async fn insert_user(
    store: &dyn UserStore,
    first_name: String,
    last_name: String,
    email: String,
    password: String,
    role: Role,
    status: Status,
) -> AppResult<User> {
    if store.find_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(StoreError::DuplicateEmail.into());
    }

    let password_hash = hash_password_async(password).await?;
    let new = NewUser {
        first_name,
        last_name,
        email,
        password_hash,
        role,
        status,
    };
    match store.create(new).await {
        Ok(user) => Ok(user),
        Err(StoreError::DuplicateEmail) => {
            warn!("email registered concurrently");
            Err(StoreError::DuplicateEmail.into())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn register(store: &dyn UserStore, req: RegisterRequest) -> AppResult<User> {
    let password = req.password.filter(|p| !p.is_empty());
    let (Some(email), Some(password)) = (non_blank(req.email), password) else {
        return Err(AppError::Validation("Email and password are required".into()));
    };
    let email = checked_email(&email)?;
    validate_password(&password).map_err(AppError::Validation)?;

    let user = insert_user(
        store,
        non_blank(req.first_name).unwrap_or_default(),
        non_blank(req.last_name).unwrap_or_default(),
        email,
        password,
        Role::default(),
        Status::default(),
    )
    .await?;
    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok(user)
}

/// Resolves an email/password pair to its user.
pub async fn authenticate(
    store: &dyn UserStore,
    email: Option<String>,
    password: Option<String>,
) -> AppResult<User> {
    let password = password.filter(|p| !p.is_empty());
    let (Some(email), Some(password)) = (non_blank(email), password) else {
        return Err(AppError::Validation("Email and password are required".into()));
    };
    let email = normalize_email(&email);

    let Some(user) = store.find_by_email(&email).await? else {
        verify_password_async(password, DECOY_HASH.clone()).await?;
        warn!(email = %email, "login unknown email");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
    };

    if !verify_password_async(password, user.password_hash.clone()).await? {
        warn!(email = %email, user_id = %user.id, "login invalid password");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
    }

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(user)
}

pub async fn list_users(store: &dyn UserStore) -> AppResult<Vec<User>> {
    Ok(store.list().await?)
}

pub async fn create_user(store: &dyn UserStore, req: CreateUserRequest) -> AppResult<User> {
    let first_name = non_blank(req.first_name)
        .ok_or_else(|| AppError::Validation("First name is required".into()))?;
    let last_name = non_blank(req.last_name)
        .ok_or_else(|| AppError::Validation("Last name is required".into()))?;
    let email = non_blank(req.email)
        .ok_or_else(|| AppError::Validation("Email is required".into()))?;
    let email = checked_email(&email)?;
    let password = req
        .password
        .ok_or_else(|| AppError::Validation("Password is required".into()))?;
    validate_password(&password).map_err(AppError::Validation)?;

    let user = insert_user(
        store,
        first_name,
        last_name,
        email,
        password,
        req.role.unwrap_or_default(),
        req.status.unwrap_or_default(),
    )
    .await?;
    info!(user_id = %user.id, role = %user.role, "user created");
    Ok(user)
}

pub async fn get_user(store: &dyn UserStore, id: Uuid) -> AppResult<User> {
    store
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(USER_NOT_FOUND.into()))
}

/// Applies a partial update. A new email is re-normalized and a new password
/// re-hashed before anything reaches the store; unknown ids are rejected
/// before any hashing.
pub async fn update_user(
    store: &dyn UserStore,
    id: Uuid,
    req: UpdateUserRequest,
) -> AppResult<User> {
    let mut changes = UserChanges {
        role: req.role,
        status: req.status,
        ..Default::default()
    };
    if let Some(first) = req.first_name {
        changes.first_name = Some(checked_name(first, "First name")?);
    }
    if let Some(last) = req.last_name {
        changes.last_name = Some(checked_name(last, "Last name")?);
    }
    if let Some(email) = req.email {
        changes.email = Some(checked_email(&email)?);
    }
    if let Some(password) = req.password.as_deref() {
        validate_password(password).map_err(AppError::Validation)?;
    }

    if store.find_by_id(id).await?.is_none() {
        return Err(AppError::NotFound(USER_NOT_FOUND.into()));
    }
    if let Some(password) = req.password {
        changes.password_hash = Some(hash_password_async(password).await?);
    }

    let password_changed = changes.password_hash.is_some();
    let user = store
        .update(id, changes)
        .await?
        .ok_or_else(|| AppError::NotFound(USER_NOT_FOUND.into()))?;
    info!(user_id = %user.id, password_changed, "user updated");
    Ok(user)
}

pub async fn delete_user(store: &dyn UserStore, id: Uuid) -> AppResult<User> {
    let user = store
        .delete(id)
        .await?
        .ok_or_else(|| AppError::NotFound(USER_NOT_FOUND.into()))?;
    info!(user_id = %user.id, email = %user.email, "user deleted");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::{auth::password::verify_password, users::memory::MemoryUserStore};

    /// Loses every insert race: the email looks free, then the store refuses it.
    struct RacingStore;

    #[async_trait]
    impl UserStore for RacingStore {
        async fn find_by_email(&self, _email: &str) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        async fn find_by_id(&self, _id: Uuid) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        async fn create(&self, _new: NewUser) -> Result<User, StoreError> {
            Err(StoreError::DuplicateEmail)
        }
        async fn update(
            &self,
            _id: Uuid,
            _changes: UserChanges,
        ) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        async fn delete(&self, _id: Uuid) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        async fn list(&self) -> Result<Vec<User>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn registration(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            email: Some(email.into()),
            password: Some(password.into()),
            ..Default::default()
        }
    }

    fn admin_create(email: &str) -> CreateUserRequest {
        CreateUserRequest {
            first_name: Some("  Sunil ".into()),
            last_name: Some("Fernando".into()),
            email: Some(email.into()),
            password: Some("warehouse-42".into()),
            role: Some(Role::InventoryManager),
            status: None,
        }
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@x.com"));
        assert!(!is_valid_email("a@x"));
        assert!(!is_valid_email("no-at-sign.com"));
        assert!(!is_valid_email("a b@x.com"));
        assert_eq!(normalize_email("  A@X.Com "), "a@x.com");
    }

    #[test]
    fn malformed_id_is_a_validation_error() {
        assert!(matches!(parse_user_id("42"), Err(AppError::Validation(_))));
        let id = Uuid::new_v4();
        assert_eq!(parse_user_id(&id.to_string()).unwrap(), id);
    }

    #[tokio::test]
    async fn register_normalizes_and_hashes() {
        let store = MemoryUserStore::new();
        let user = register(&store, registration("  A@X.com ", "longenough1"))
            .await
            .unwrap();
        assert_eq!(user.email, "a@x.com");
        assert_ne!(user.password_hash, "longenough1");
        assert!(verify_password("longenough1", &user.password_hash));
        assert_eq!(user.role, Role::Customer);
        assert_eq!(user.status, Status::Active);
    }

    #[tokio::test]
    async fn register_twice_conflicts_regardless_of_case() {
        let store = MemoryUserStore::new();
        register(&store, registration("a@x.com", "longenough1")).await.unwrap();
        let err = register(&store, registration("A@X.com", "other12345"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn register_validates_input() {
        let store = MemoryUserStore::new();
        let missing = RegisterRequest {
            email: Some("a@x.com".into()),
            ..Default::default()
        };
        assert!(matches!(register(&store, missing).await, Err(AppError::Validation(_))));
        assert!(matches!(
            register(&store, registration("not-an-email", "longenough1")).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            register(&store, registration("a@x.com", "short")).await,
            Err(AppError::Validation(_))
        ));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn authenticate_hides_which_part_was_wrong() {
        let store = MemoryUserStore::new();
        register(&store, registration("a@x.com", "longenough1")).await.unwrap();

        let wrong_password = authenticate(&store, Some("a@x.com".into()), Some("wrong".into()))
            .await
            .unwrap_err();
        let unknown_email =
            authenticate(&store, Some("b@x.com".into()), Some("longenough1".into()))
                .await
                .unwrap_err();
        match (wrong_password, unknown_email) {
            (AppError::Unauthorized(a), AppError::Unauthorized(b)) => {
                assert_eq!(a, INVALID_CREDENTIALS);
                assert_eq!(a, b);
            }
            other => panic!("expected two Unauthorized errors, got {other:?}"),
        }

        let user = authenticate(&store, Some(" A@x.COM".into()), Some("longenough1".into()))
            .await
            .unwrap();
        assert_eq!(user.email, "a@x.com");
    }

    #[test]
    fn decoy_hash_is_a_real_argon2_hash() {
        assert!(DECOY_HASH.starts_with("$argon2id$"));
        assert!(verify_password(DECOY_PASSWORD, &DECOY_HASH));
    }

    #[tokio::test]
    async fn unknown_email_is_rejected_even_with_the_decoy_password() {
        let store = MemoryUserStore::new();
        let err = authenticate(&store, Some("ghost@x.com".into()), Some(DECOY_PASSWORD.into()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(ref m) if m == INVALID_CREDENTIALS));
    }

    #[tokio::test]
    async fn authenticate_requires_both_fields() {
        let store = MemoryUserStore::new();
        let err = authenticate(&store, None, Some("longenough1".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn create_user_requires_names_and_keeps_role() {
        let store = MemoryUserStore::new();
        let user = create_user(&store, admin_create("sunil@packpal.lk")).await.unwrap();
        assert_eq!(user.first_name, "Sunil");
        assert_eq!(user.role, Role::InventoryManager);

        let mut nameless = admin_create("other@packpal.lk");
        nameless.last_name = Some("   ".into());
        assert!(matches!(create_user(&store, nameless).await, Err(AppError::Validation(_))));

        let err = create_user(&store, admin_create("SUNIL@packpal.lk")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn insert_lost_to_a_concurrent_writer_is_a_conflict() {
        let store = RacingStore;
        let err = register(&store, registration("a@x.com", "longenough1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let err = create_user(&store, admin_create("sunil@packpal.lk"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn password_update_rehashes_and_leaves_other_fields() {
        let store = MemoryUserStore::new();
        let before = create_user(&store, admin_create("sunil@packpal.lk")).await.unwrap();

        let req = UpdateUserRequest {
            password: Some("newpass123".into()),
            ..Default::default()
        };
        let after = update_user(&store, before.id, req).await.unwrap();

        assert!(verify_password("newpass123", &after.password_hash));
        assert!(!verify_password("warehouse-42", &after.password_hash));
        assert_eq!(after.first_name, before.first_name);
        assert_eq!(after.last_name, before.last_name);
        assert_eq!(after.email, before.email);
        assert_eq!(after.role, before.role);
        assert_eq!(after.status, before.status);
    }

    #[tokio::test]
    async fn update_renormalizes_email_and_rejects_bad_fields() {
        let store = MemoryUserStore::new();
        let user = create_user(&store, admin_create("sunil@packpal.lk")).await.unwrap();

        let req = UpdateUserRequest {
            email: Some(" Sunil.F@PackPal.lk ".into()),
            status: Some(Status::Suspended),
            ..Default::default()
        };
        let updated = update_user(&store, user.id, req).await.unwrap();
        assert_eq!(updated.email, "sunil.f@packpal.lk");
        assert_eq!(updated.status, Status::Suspended);

        let short = UpdateUserRequest {
            password: Some("tiny".into()),
            ..Default::default()
        };
        assert!(matches!(
            update_user(&store, user.id, short).await,
            Err(AppError::Validation(_))
        ));

        let blank = UpdateUserRequest {
            first_name: Some("".into()),
            ..Default::default()
        };
        assert!(matches!(
            update_user(&store, user.id, blank).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = MemoryUserStore::new();
        register(&store, registration("a@x.com", "longenough1")).await.unwrap();
        let id = Uuid::new_v4();
        assert!(matches!(get_user(&store, id).await, Err(AppError::NotFound(_))));
        assert!(matches!(
            update_user(&store, id, UpdateUserRequest::default()).await,
            Err(AppError::NotFound(_))
        ));
        // an unknown id is 404 even when the new email belongs to someone else
        let taken = UpdateUserRequest {
            email: Some("a@x.com".into()),
            ..Default::default()
        };
        assert!(matches!(update_user(&store, id, taken).await, Err(AppError::NotFound(_))));
        let new_password = UpdateUserRequest {
            password: Some("newpass123".into()),
            ..Default::default()
        };
        assert!(matches!(
            update_user(&store, id, new_password).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(delete_user(&store, id).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let store = MemoryUserStore::new();
        let user = create_user(&store, admin_create("sunil@packpal.lk")).await.unwrap();
        let deleted = delete_user(&store, user.id).await.unwrap();
        assert_eq!(deleted.id, user.id);
        assert!(matches!(get_user(&store, user.id).await, Err(AppError::NotFound(_))));
        assert!(matches!(delete_user(&store, user.id).await, Err(AppError::NotFound(_))));
    }
}
