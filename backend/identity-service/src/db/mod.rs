//! Persistence for users, one-time tokens and sessions.
//!
//! Business code talks to the [`Database`] trait. A unit of work is either a
//! plain connection ([`Database::acquire`]) or a transaction
//! ([`Database::begin`]); both expose the same [`UserStore`] operations, so a
//! command passes the handle it holds explicitly to every repository call.

pub mod memory;
pub mod postgres;
pub mod sessions;
pub mod tokens;
pub mod transaction;
pub mod users;

use crate::models::{Session, Token, TokenScope, User};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub use memory::{FailPoint, MemoryDatabase};
pub use postgres::PgDatabase;
pub use transaction::with_transaction;

pub type RepoResult<T> = std::result::Result<T, RepoError>;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("email already exists")]
    EmailConflict,

    #[error("phone number already exists")]
    PhoneConflict,

    #[error("user id already exists")]
    UserIdConflict,

    #[error("federated identity already linked")]
    ProviderIdConflict,

    #[error("user not found")]
    UserNotFound,

    #[error("token already issued to this user")]
    TokenConflict,

    #[error("token not found")]
    TokenNotFound,

    #[error("session not found")]
    SessionNotFound,

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            if db_err.is_unique_violation() {
                match db_err.constraint() {
                    Some(users::EMAIL_CONSTRAINT) => return RepoError::EmailConflict,
                    Some(users::PHONE_CONSTRAINT) => return RepoError::PhoneConflict,
                    Some(users::ID_CONSTRAINT) => return RepoError::UserIdConflict,
                    Some(users::PROVIDER_CONSTRAINT) => return RepoError::ProviderIdConflict,
                    _ => {}
                }
            }
        }
        tracing::error!(error = %err, "database error");
        RepoError::Database(err.to_string())
    }
}

/// Repository operations available on any unit of work.
///
/// Lookups return `Ok(None)` when nothing matches; mutations that must hit an
/// existing row report the matching `*NotFound` variant instead.
#[async_trait]
pub trait UserStore: Send {
    /// Insert a new user. A duplicate id, email, phone or federated identity is
    /// reported as the corresponding conflict variant.
    async fn create_user(&mut self, user: &User) -> RepoResult<()>;

    async fn get_user_by_id(&mut self, id: Uuid) -> RepoResult<Option<User>>;

    async fn get_user_by_email(&mut self, email: &str) -> RepoResult<Option<User>>;

    /// Overwrite profile fields (names, phone, country, role, flags).
    async fn update_user(&mut self, user: &User) -> RepoResult<()>;

    async fn verify_user(&mut self, id: Uuid) -> RepoResult<()>;

    async fn update_password(&mut self, id: Uuid, password_hash: &str) -> RepoResult<()>;

    async fn create_session(&mut self, session: &Session) -> RepoResult<()>;

    async fn get_session(&mut self, id: Uuid) -> RepoResult<Option<Session>>;

    /// Block the unblocked session of `user_id` whose refresh digest matches
    /// and return its id.
    async fn block_session(&mut self, user_id: Uuid, refresh_token_hash: &str) -> RepoResult<Uuid>;

    /// Store a token digest. The same digest may belong to several users; a
    /// repeat for the same owner and scope is a `TokenConflict`.
    async fn create_token(&mut self, token: &Token) -> RepoResult<()>;

    /// Owner of an unexpired token with this digest and scope. Meant for
    /// high-entropy tokens, whose digests do not repeat.
    async fn get_user_id_by_token(
        &mut self,
        token_hash: &str,
        scope: TokenScope,
    ) -> RepoResult<Option<Uuid>>;

    /// Whether `user_id` holds an unexpired token with this digest and scope.
    async fn has_token(
        &mut self,
        user_id: Uuid,
        token_hash: &str,
        scope: TokenScope,
    ) -> RepoResult<bool>;

    async fn delete_token(
        &mut self,
        user_id: Uuid,
        token_hash: &str,
        scope: TokenScope,
    ) -> RepoResult<()>;

    /// Remove expired token rows; returns how many were deleted.
    async fn purge_expired_tokens(&mut self) -> RepoResult<u64>;
}

/// A transaction: the store operations plus an explicit end.
#[async_trait]
pub trait StoreTx: UserStore {
    async fn commit(self: Box<Self>) -> RepoResult<()>;
    async fn rollback(self: Box<Self>) -> RepoResult<()>;
}

/// Source of units of work.
#[async_trait]
pub trait Database: Send + Sync {
    async fn acquire(&self) -> RepoResult<Box<dyn UserStore>>;
    async fn begin(&self) -> RepoResult<Box<dyn StoreTx>>;
}
