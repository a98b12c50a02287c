use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::users::{
    repo_types::{NewUser, User, UserChanges, UserRow},
    store::{StoreError, UserStore},
};

const USER_COLUMNS: &str =
    "id, first_name, last_name, email, password_hash, role, status, created_at, updated_at";

/// PostgreSQL-backed user store. Uniqueness rests on `uq_users_email`.
#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn into_user(row: UserRow) -> Result<User, StoreError> {
    Ok(User::try_from(row)?)
}

fn into_optional(row: Option<UserRow>) -> Result<Option<User>, StoreError> {
    row.map(into_user).transpose()
}

#[async_trait]
impl UserStore for PgUserStore {
    /// Find a user by normalized email.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        into_optional(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        into_optional(row)
    }

    /// Insert a new user. A concurrent insert of the same email surfaces as
    /// a unique violation, which `From<sqlx::Error>` turns into `DuplicateEmail`.
    async fn create(&self, new: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (id, first_name, last_name, email, password_hash, role, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.first_name)
        .bind(&new.last_name)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(new.role.as_str())
        .bind(new.status.as_str())
        .fetch_one(&self.db)
        .await?;
        into_user(row)
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users SET
                first_name    = COALESCE($2, first_name),
                last_name     = COALESCE($3, last_name),
                email         = COALESCE($4, email),
                password_hash = COALESCE($5, password_hash),
                role          = COALESCE($6, role),
                status        = COALESCE($7, status),
                updated_at    = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(changes.first_name)
        .bind(changes.last_name)
        .bind(changes.email)
        .bind(changes.password_hash)
        .bind(changes.role.map(|r| r.as_str()))
        .bind(changes.status.map(|s| s.as_str()))
        .fetch_optional(&self.db)
        .await?;
        into_optional(row)
    }

    async fn delete(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "DELETE FROM users WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        into_optional(row)
    }

    async fn list(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!("SELECT {USER_COLUMNS} FROM users"))
            .fetch_all(&self.db)
            .await?;
        rows.into_iter().map(into_user).collect()
    }
}
