/// PostgreSQL implementation of the repository traits
use super::{sessions, tokens, users, Database, RepoResult, StoreTx, UserStore};
use crate::models::{Session, Token, TokenScope, User};
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;

#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn acquire(&self) -> RepoResult<Box<dyn UserStore>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgStore { conn }))
    }

    async fn begin(&self) -> RepoResult<Box<dyn StoreTx>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgTx { tx }))
    }
}

/// Autocommit unit of work over a pooled connection.
struct PgStore {
    conn: PoolConnection<Postgres>,
}

/// Transactional unit of work.
struct PgTx {
    tx: Transaction<'static, Postgres>,
}

trait PgHandle: Send {
    fn connection(&mut self) -> &mut PgConnection;
}

impl PgHandle for PgStore {
    fn connection(&mut self) -> &mut PgConnection {
        &mut self.conn
    }
}

impl PgHandle for PgTx {
    fn connection(&mut self) -> &mut PgConnection {
        &mut self.tx
    }
}

#[async_trait]
impl<H: PgHandle> UserStore for H {
    async fn create_user(&mut self, user: &User) -> RepoResult<()> {
        users::create_user(self.connection(), user).await
    }

    async fn get_user_by_id(&mut self, id: Uuid) -> RepoResult<Option<User>> {
        users::find_by_id(self.connection(), id).await
    }

    async fn get_user_by_email(&mut self, email: &str) -> RepoResult<Option<User>> {
        users::find_by_email(self.connection(), email).await
    }

    async fn update_user(&mut self, user: &User) -> RepoResult<()> {
        users::update_user(self.connection(), user).await
    }

    async fn verify_user(&mut self, id: Uuid) -> RepoResult<()> {
        users::verify_user(self.connection(), id).await
    }

    async fn update_password(&mut self, id: Uuid, password_hash: &str) -> RepoResult<()> {
        users::update_password(self.connection(), id, password_hash).await
    }

    async fn create_session(&mut self, session: &Session) -> RepoResult<()> {
        sessions::create_session(self.connection(), session).await
    }

    async fn get_session(&mut self, id: Uuid) -> RepoResult<Option<Session>> {
        sessions::get_session(self.connection(), id).await
    }

    async fn block_session(&mut self, user_id: Uuid, refresh_token_hash: &str) -> RepoResult<Uuid> {
        sessions::block_session(self.connection(), user_id, refresh_token_hash).await
    }

    async fn create_token(&mut self, token: &Token) -> RepoResult<()> {
        tokens::create_token(self.connection(), token).await
    }

    async fn get_user_id_by_token(
        &mut self,
        token_hash: &str,
        scope: TokenScope,
    ) -> RepoResult<Option<Uuid>> {
        tokens::find_user_id(self.connection(), token_hash, scope).await
    }

    async fn has_token(
        &mut self,
        user_id: Uuid,
        token_hash: &str,
        scope: TokenScope,
    ) -> RepoResult<bool> {
        tokens::token_exists(self.connection(), user_id, token_hash, scope).await
    }

    async fn delete_token(
        &mut self,
        user_id: Uuid,
        token_hash: &str,
        scope: TokenScope,
    ) -> RepoResult<()> {
        tokens::delete_token(self.connection(), user_id, token_hash, scope).await
    }

    async fn purge_expired_tokens(&mut self) -> RepoResult<u64> {
        tokens::purge_expired(self.connection()).await
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn commit(self: Box<Self>) -> RepoResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> RepoResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
