/// User database operations
use super::{RepoError, RepoResult};
use crate::models::{AuthMethod, Role, User};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

pub const ID_CONSTRAINT: &str = "users_pkey";
pub const EMAIL_CONSTRAINT: &str = "users_email_key";
pub const PHONE_CONSTRAINT: &str = "users_phone_number_key";
pub const PROVIDER_CONSTRAINT: &str = "users_provider_key";

const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, phone_number, country, \
     provider, provider_id, role, is_verified, is_enabled, deleted_at, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: Option<String>,
    first_name: String,
    last_name: String,
    phone_number: String,
    country: String,
    provider: Option<String>,
    provider_id: Option<String>,
    role: String,
    is_verified: bool,
    is_enabled: bool,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = RepoError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let auth = match (row.password_hash, row.provider, row.provider_id) {
            (Some(password_hash), None, None) => AuthMethod::Password { password_hash },
            (None, Some(provider), Some(provider_id)) => AuthMethod::Federated {
                provider,
                provider_id,
            },
            _ => {
                return Err(RepoError::Corrupt(format!(
                    "user {} has an inconsistent authentication method",
                    row.id
                )))
            }
        };
        let role = Role::parse(&row.role).map_err(|e| RepoError::Corrupt(e.to_string()))?;

        Ok(User {
            id: row.id,
            email: row.email,
            auth,
            first_name: row.first_name,
            last_name: row.last_name,
            phone_number: row.phone_number,
            country: row.country,
            role,
            is_verified: row.is_verified,
            is_enabled: row.is_enabled,
            deleted_at: row.deleted_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn auth_columns(auth: &AuthMethod) -> (Option<&str>, Option<&str>, Option<&str>) {
    match auth {
        AuthMethod::Password { password_hash } => (Some(password_hash.as_str()), None, None),
        AuthMethod::Federated {
            provider,
            provider_id,
        } => (None, Some(provider.as_str()), Some(provider_id.as_str())),
    }
}

/// Insert a user. An id collision is detected with `ON CONFLICT` rather than an
/// error so the surrounding transaction stays usable for a retry.
pub async fn create_user(conn: &mut PgConnection, user: &User) -> RepoResult<()> {
    let (password_hash, provider, provider_id) = auth_columns(&user.auth);

    let result = sqlx::query(
        r#"
        INSERT INTO users (
            id, email, password_hash, first_name, last_name, phone_number, country,
            provider, provider_id, role, is_verified, is_enabled, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(user.id)
    .bind(&user.email)
    .bind(password_hash)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.phone_number)
    .bind(&user.country)
    .bind(provider)
    .bind(provider_id)
    .bind(user.role.as_str())
    .bind(user.is_verified)
    .bind(user.is_enabled)
    .bind(user.created_at)
    .bind(user.updated_at)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepoError::UserIdConflict);
    }
    Ok(())
}

/// Find user by ID (excluding soft-deleted users)
pub async fn find_by_id(conn: &mut PgConnection, id: Uuid) -> RepoResult<Option<User>> {
    let sql = format!(
        "SELECT {} FROM users WHERE id = $1 AND deleted_at IS NULL",
        USER_COLUMNS
    );
    let row = sqlx::query_as::<_, UserRow>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?;

    row.map(User::try_from).transpose()
}

/// Find user by email (excluding soft-deleted users)
pub async fn find_by_email(conn: &mut PgConnection, email: &str) -> RepoResult<Option<User>> {
    let sql = format!(
        "SELECT {} FROM users WHERE email = $1 AND deleted_at IS NULL",
        USER_COLUMNS
    );
    let row = sqlx::query_as::<_, UserRow>(&sql)
        .bind(email)
        .fetch_optional(conn)
        .await?;

    row.map(User::try_from).transpose()
}

pub async fn update_user(conn: &mut PgConnection, user: &User) -> RepoResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET first_name = $2, last_name = $3, phone_number = $4, country = $5,
            role = $6, is_enabled = $7, updated_at = NOW()
        WHERE id = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(user.id)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.phone_number)
    .bind(&user.country)
    .bind(user.role.as_str())
    .bind(user.is_enabled)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepoError::UserNotFound);
    }
    Ok(())
}

pub async fn verify_user(conn: &mut PgConnection, id: Uuid) -> RepoResult<()> {
    let result = sqlx::query(
        "UPDATE users SET is_verified = TRUE, updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(id)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepoError::UserNotFound);
    }
    Ok(())
}

/// Set a new password digest. Only local accounts have one; the
/// `provider IS NULL` guard keeps federated users password-less.
pub async fn update_password(
    conn: &mut PgConnection,
    id: Uuid,
    password_hash: &str,
) -> RepoResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET password_hash = $2, updated_at = NOW()
        WHERE id = $1 AND provider IS NULL AND deleted_at IS NULL
        "#,
    )
    .bind(id)
    .bind(password_hash)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepoError::UserNotFound);
    }
    Ok(())
}
