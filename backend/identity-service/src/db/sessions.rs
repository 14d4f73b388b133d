/// Session database operations
use super::{RepoError, RepoResult};
use crate::models::Session;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    user_id: Uuid,
    refresh_token_hash: String,
    user_agent: String,
    client_ip: String,
    is_blocked: bool,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: row.id,
            user_id: row.user_id,
            refresh_token_hash: row.refresh_token_hash,
            user_agent: row.user_agent,
            client_ip: row.client_ip,
            is_blocked: row.is_blocked,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

pub async fn create_session(conn: &mut PgConnection, session: &Session) -> RepoResult<()> {
    sqlx::query(
        r#"
        INSERT INTO sessions (
            id, user_id, refresh_token_hash, user_agent, client_ip,
            is_blocked, expires_at, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(session.id)
    .bind(session.user_id)
    .bind(&session.refresh_token_hash)
    .bind(&session.user_agent)
    .bind(&session.client_ip)
    .bind(session.is_blocked)
    .bind(session.expires_at)
    .bind(session.created_at)
    .execute(conn)
    .await?;

    Ok(())
}

/// Get session by ID
pub async fn get_session(conn: &mut PgConnection, id: Uuid) -> RepoResult<Option<Session>> {
    let row = sqlx::query_as::<_, SessionRow>(
        r#"
        SELECT id, user_id, refresh_token_hash, user_agent, client_ip,
               is_blocked, expires_at, created_at
        FROM sessions
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;

    Ok(row.map(Session::from))
}

/// Block a session and return its id. Blocking is one-way; already blocked
/// sessions do not match.
pub async fn block_session(
    conn: &mut PgConnection,
    user_id: Uuid,
    refresh_token_hash: &str,
) -> RepoResult<Uuid> {
    sqlx::query_scalar::<_, Uuid>(
        r#"
        UPDATE sessions
        SET is_blocked = TRUE
        WHERE refresh_token_hash = $1 AND user_id = $2 AND is_blocked = FALSE
        RETURNING id
        "#,
    )
    .bind(refresh_token_hash)
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .ok_or(RepoError::SessionNotFound)
}
