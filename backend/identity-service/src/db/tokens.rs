/// One-time token database operations (digests only)
///
/// Rows are keyed by owner, scope and digest. Six-digit activation codes can
/// repeat across users; opaque reset tokens are unique in practice.
use super::{RepoError, RepoResult};
use crate::models::{Token, TokenScope};
use sqlx::PgConnection;
use uuid::Uuid;

pub async fn create_token(conn: &mut PgConnection, token: &Token) -> RepoResult<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO tokens (token_hash, scope, user_id, expires_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (user_id, scope, token_hash) DO NOTHING
        "#,
    )
    .bind(&token.hash)
    .bind(token.scope.as_str())
    .bind(token.user_id)
    .bind(token.expires_at)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepoError::TokenConflict);
    }
    Ok(())
}

/// Owner of an unexpired token; expired rows are treated as absent.
pub async fn find_user_id(
    conn: &mut PgConnection,
    token_hash: &str,
    scope: TokenScope,
) -> RepoResult<Option<Uuid>> {
    let user_id = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT user_id FROM tokens
        WHERE token_hash = $1 AND scope = $2 AND expires_at > NOW()
        ORDER BY created_at
        LIMIT 1
        "#,
    )
    .bind(token_hash)
    .bind(scope.as_str())
    .fetch_optional(conn)
    .await?;

    Ok(user_id)
}

/// Whether `user_id` holds an unexpired token with this digest.
pub async fn token_exists(
    conn: &mut PgConnection,
    user_id: Uuid,
    token_hash: &str,
    scope: TokenScope,
) -> RepoResult<bool> {
    let exists = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM tokens
            WHERE user_id = $1 AND scope = $2 AND token_hash = $3 AND expires_at > NOW()
        )
        "#,
    )
    .bind(user_id)
    .bind(scope.as_str())
    .bind(token_hash)
    .fetch_one(conn)
    .await?;

    Ok(exists)
}

pub async fn delete_token(
    conn: &mut PgConnection,
    user_id: Uuid,
    token_hash: &str,
    scope: TokenScope,
) -> RepoResult<()> {
    let result = sqlx::query(
        "DELETE FROM tokens WHERE user_id = $1 AND scope = $2 AND token_hash = $3",
    )
    .bind(user_id)
    .bind(scope.as_str())
    .bind(token_hash)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(RepoError::TokenNotFound);
    }
    Ok(())
}

pub async fn purge_expired(conn: &mut PgConnection) -> RepoResult<u64> {
    let result = sqlx::query("DELETE FROM tokens WHERE expires_at <= NOW()")
        .execute(conn)
        .await?;

    Ok(result.rows_affected())
}
