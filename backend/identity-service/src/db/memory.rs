//! In-process repository for tests and local runs.
//!
//! Transactions take the store lock for their whole lifetime and work on a
//! staged copy that replaces the shared state on commit, so they are
//! serializable. Failure points can be armed to make specific operations fail.

use super::{Database, RepoError, RepoResult, StoreTx, UserStore};
use crate::models::{AuthMethod, Session, Token, TokenScope, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// Operations that can be forced to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// `create_user` reports a user-id collision instead of inserting.
    UserIdCollision,
    CreateUser,
    UpdateUser,
    VerifyUser,
    UpdatePassword,
    CreateSession,
    BlockSession,
    /// `create_token` reports the digest as already issued to its owner.
    TokenCollision,
    CreateToken,
    DeleteToken,
    Commit,
}

/// Owner, scope and digest, like the table's primary key.
type TokenKey = (Uuid, TokenScope, String);

#[derive(Debug, Clone, Default)]
struct State {
    users: HashMap<Uuid, User>,
    tokens: HashMap<TokenKey, DateTime<Utc>>,
    sessions: HashMap<Uuid, Session>,
}

impl State {
    fn create_user(&mut self, user: &User) -> RepoResult<()> {
        if self.users.contains_key(&user.id) {
            return Err(RepoError::UserIdConflict);
        }
        for existing in self.users.values() {
            if existing.email == user.email {
                return Err(RepoError::EmailConflict);
            }
            if existing.phone_number == user.phone_number {
                return Err(RepoError::PhoneConflict);
            }
            if let (
                AuthMethod::Federated {
                    provider: p1,
                    provider_id: i1,
                },
                AuthMethod::Federated {
                    provider: p2,
                    provider_id: i2,
                },
            ) = (&existing.auth, &user.auth)
            {
                if p1 == p2 && i1 == i2 {
                    return Err(RepoError::ProviderIdConflict);
                }
            }
        }
        self.users.insert(user.id, user.clone());
        Ok(())
    }

    fn live_user_mut(&mut self, id: Uuid) -> RepoResult<&mut User> {
        self.users
            .get_mut(&id)
            .filter(|u| u.deleted_at.is_none())
            .ok_or(RepoError::UserNotFound)
    }

    fn get_user_by_id(&self, id: Uuid) -> Option<User> {
        self.users
            .get(&id)
            .filter(|u| u.deleted_at.is_none())
            .cloned()
    }

    fn get_user_by_email(&self, email: &str) -> Option<User> {
        self.users
            .values()
            .find(|u| u.email == email && u.deleted_at.is_none())
            .cloned()
    }

    fn update_user(&mut self, user: &User) -> RepoResult<()> {
        if self
            .users
            .values()
            .any(|u| u.id != user.id && u.phone_number == user.phone_number)
        {
            return Err(RepoError::PhoneConflict);
        }
        let stored = self.live_user_mut(user.id)?;
        stored.first_name = user.first_name.clone();
        stored.last_name = user.last_name.clone();
        stored.phone_number = user.phone_number.clone();
        stored.country = user.country.clone();
        stored.role = user.role;
        stored.is_enabled = user.is_enabled;
        stored.updated_at = Utc::now();
        Ok(())
    }

    fn verify_user(&mut self, id: Uuid) -> RepoResult<()> {
        let stored = self.live_user_mut(id)?;
        stored.is_verified = true;
        stored.updated_at = Utc::now();
        Ok(())
    }

    fn update_password(&mut self, id: Uuid, password_hash: &str) -> RepoResult<()> {
        let stored = self.live_user_mut(id)?;
        match &mut stored.auth {
            AuthMethod::Password { password_hash: current } => {
                *current = password_hash.to_string();
            }
            AuthMethod::Federated { .. } => return Err(RepoError::UserNotFound),
        }
        stored.updated_at = Utc::now();
        Ok(())
    }

    fn create_session(&mut self, session: &Session) -> RepoResult<()> {
        if self.sessions.contains_key(&session.id)
            || self
                .sessions
                .values()
                .any(|s| s.refresh_token_hash == session.refresh_token_hash)
        {
            return Err(RepoError::Database("duplicate session".to_string()));
        }
        self.sessions.insert(session.id, session.clone());
        Ok(())
    }

    fn block_session(&mut self, user_id: Uuid, refresh_token_hash: &str) -> RepoResult<Uuid> {
        let session = self
            .sessions
            .values_mut()
            .find(|s| {
                s.refresh_token_hash == refresh_token_hash && s.user_id == user_id && !s.is_blocked
            })
            .ok_or(RepoError::SessionNotFound)?;
        session.is_blocked = true;
        Ok(session.id)
    }

    fn create_token(&mut self, token: &Token) -> RepoResult<()> {
        if !self.users.contains_key(&token.user_id) {
            return Err(RepoError::Database("token owner does not exist".to_string()));
        }
        let key = (token.user_id, token.scope, token.hash.clone());
        if self.tokens.contains_key(&key) {
            return Err(RepoError::TokenConflict);
        }
        self.tokens.insert(key, token.expires_at);
        Ok(())
    }

    fn get_user_id_by_token(&self, token_hash: &str, scope: TokenScope) -> Option<Uuid> {
        let now = Utc::now();
        self.tokens
            .iter()
            .find(|((_, s, hash), expires_at)| {
                *s == scope && hash == token_hash && **expires_at > now
            })
            .map(|((user_id, _, _), _)| *user_id)
    }

    fn has_token(&self, user_id: Uuid, token_hash: &str, scope: TokenScope) -> bool {
        self.tokens
            .get(&(user_id, scope, token_hash.to_string()))
            .map(|expires_at| *expires_at > Utc::now())
            .unwrap_or(false)
    }

    fn delete_token(
        &mut self,
        user_id: Uuid,
        token_hash: &str,
        scope: TokenScope,
    ) -> RepoResult<()> {
        self.tokens
            .remove(&(user_id, scope, token_hash.to_string()))
            .map(|_| ())
            .ok_or(RepoError::TokenNotFound)
    }

    fn purge_expired_tokens(&mut self) -> u64 {
        let now = Utc::now();
        let before = self.tokens.len();
        self.tokens.retain(|_, expires_at| *expires_at > now);
        (before - self.tokens.len()) as u64
    }
}

/// Shared in-process database. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
    failpoints: Arc<StdMutex<HashMap<FailPoint, u32>>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` hits of `point` fail.
    pub fn fail_times(&self, point: FailPoint, times: u32) {
        if let Ok(mut armed) = self.failpoints.lock() {
            *armed.entry(point).or_insert(0) += times;
        }
    }

    pub fn fail_once(&self, point: FailPoint) {
        self.fail_times(point, 1);
    }

    fn check(&self, point: FailPoint) -> RepoResult<()> {
        let fire = match self.failpoints.lock() {
            Ok(mut armed) => match armed.get_mut(&point) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                }
                _ => false,
            },
            Err(_) => false,
        };
        if !fire {
            return Ok(());
        }
        match point {
            FailPoint::UserIdCollision => Err(RepoError::UserIdConflict),
            FailPoint::TokenCollision => Err(RepoError::TokenConflict),
            other => Err(RepoError::Database(format!("injected failure at {:?}", other))),
        }
    }

    pub async fn user(&self, id: Uuid) -> Option<User> {
        self.state.lock().await.users.get(&id).cloned()
    }

    pub async fn user_count(&self) -> usize {
        self.state.lock().await.users.len()
    }

    pub async fn session(&self, id: Uuid) -> Option<Session> {
        self.state.lock().await.sessions.get(&id).cloned()
    }

    /// Stored (including expired) tokens of `user_id` in `scope`.
    pub async fn token_count(&self, user_id: Uuid, scope: TokenScope) -> usize {
        self.state
            .lock()
            .await
            .tokens
            .keys()
            .filter(|(owner, s, _)| *s == scope && *owner == user_id)
            .count()
    }

    pub async fn total_tokens(&self) -> usize {
        self.state.lock().await.tokens.len()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn acquire(&self) -> RepoResult<Box<dyn UserStore>> {
        Ok(Box::new(MemoryStore { db: self.clone() }))
    }

    async fn begin(&self) -> RepoResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx {
            db: self.clone(),
            guard,
            staged,
        }))
    }
}

/// Autocommit handle: every call locks, applies and releases.
struct MemoryStore {
    db: MemoryDatabase,
}

/// Transaction handle: holds the lock, mutates a staged copy.
struct MemoryTx {
    db: MemoryDatabase,
    guard: OwnedMutexGuard<State>,
    staged: State,
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&mut self, user: &User) -> RepoResult<()> {
        self.db.check(FailPoint::UserIdCollision)?;
        self.db.check(FailPoint::CreateUser)?;
        self.db.state.lock().await.create_user(user)
    }

    async fn get_user_by_id(&mut self, id: Uuid) -> RepoResult<Option<User>> {
        Ok(self.db.state.lock().await.get_user_by_id(id))
    }

    async fn get_user_by_email(&mut self, email: &str) -> RepoResult<Option<User>> {
        Ok(self.db.state.lock().await.get_user_by_email(email))
    }

    async fn update_user(&mut self, user: &User) -> RepoResult<()> {
        self.db.check(FailPoint::UpdateUser)?;
        self.db.state.lock().await.update_user(user)
    }

    async fn verify_user(&mut self, id: Uuid) -> RepoResult<()> {
        self.db.check(FailPoint::VerifyUser)?;
        self.db.state.lock().await.verify_user(id)
    }

    async fn update_password(&mut self, id: Uuid, password_hash: &str) -> RepoResult<()> {
        self.db.check(FailPoint::UpdatePassword)?;
        self.db.state.lock().await.update_password(id, password_hash)
    }

    async fn create_session(&mut self, session: &Session) -> RepoResult<()> {
        self.db.check(FailPoint::CreateSession)?;
        self.db.state.lock().await.create_session(session)
    }

    async fn get_session(&mut self, id: Uuid) -> RepoResult<Option<Session>> {
        Ok(self.db.state.lock().await.sessions.get(&id).cloned())
    }

    async fn block_session(&mut self, user_id: Uuid, refresh_token_hash: &str) -> RepoResult<Uuid> {
        self.db.check(FailPoint::BlockSession)?;
        self.db
            .state
            .lock()
            .await
            .block_session(user_id, refresh_token_hash)
    }

    async fn create_token(&mut self, token: &Token) -> RepoResult<()> {
        self.db.check(FailPoint::TokenCollision)?;
        self.db.check(FailPoint::CreateToken)?;
        self.db.state.lock().await.create_token(token)
    }

    async fn get_user_id_by_token(
        &mut self,
        token_hash: &str,
        scope: TokenScope,
    ) -> RepoResult<Option<Uuid>> {
        Ok(self
            .db
            .state
            .lock()
            .await
            .get_user_id_by_token(token_hash, scope))
    }

    async fn has_token(
        &mut self,
        user_id: Uuid,
        token_hash: &str,
        scope: TokenScope,
    ) -> RepoResult<bool> {
        Ok(self
            .db
            .state
            .lock()
            .await
            .has_token(user_id, token_hash, scope))
    }

    async fn delete_token(
        &mut self,
        user_id: Uuid,
        token_hash: &str,
        scope: TokenScope,
    ) -> RepoResult<()> {
        self.db.check(FailPoint::DeleteToken)?;
        self.db
            .state
            .lock()
            .await
            .delete_token(user_id, token_hash, scope)
    }

    async fn purge_expired_tokens(&mut self) -> RepoResult<u64> {
        Ok(self.db.state.lock().await.purge_expired_tokens())
    }
}

#[async_trait]
impl UserStore for MemoryTx {
    async fn create_user(&mut self, user: &User) -> RepoResult<()> {
        self.db.check(FailPoint::UserIdCollision)?;
        self.db.check(FailPoint::CreateUser)?;
        self.staged.create_user(user)
    }

    async fn get_user_by_id(&mut self, id: Uuid) -> RepoResult<Option<User>> {
        Ok(self.staged.get_user_by_id(id))
    }

    async fn get_user_by_email(&mut self, email: &str) -> RepoResult<Option<User>> {
        Ok(self.staged.get_user_by_email(email))
    }

    async fn update_user(&mut self, user: &User) -> RepoResult<()> {
        self.db.check(FailPoint::UpdateUser)?;
        self.staged.update_user(user)
    }

    async fn verify_user(&mut self, id: Uuid) -> RepoResult<()> {
        self.db.check(FailPoint::VerifyUser)?;
        self.staged.verify_user(id)
    }

    async fn update_password(&mut self, id: Uuid, password_hash: &str) -> RepoResult<()> {
        self.db.check(FailPoint::UpdatePassword)?;
        self.staged.update_password(id, password_hash)
    }

    async fn create_session(&mut self, session: &Session) -> RepoResult<()> {
        self.db.check(FailPoint::CreateSession)?;
        self.staged.create_session(session)
    }

    async fn get_session(&mut self, id: Uuid) -> RepoResult<Option<Session>> {
        Ok(self.staged.sessions.get(&id).cloned())
    }

    async fn block_session(&mut self, user_id: Uuid, refresh_token_hash: &str) -> RepoResult<Uuid> {
        self.db.check(FailPoint::BlockSession)?;
        self.staged.block_session(user_id, refresh_token_hash)
    }

    async fn create_token(&mut self, token: &Token) -> RepoResult<()> {
        self.db.check(FailPoint::TokenCollision)?;
        self.db.check(FailPoint::CreateToken)?;
        self.staged.create_token(token)
    }

    async fn get_user_id_by_token(
        &mut self,
        token_hash: &str,
        scope: TokenScope,
    ) -> RepoResult<Option<Uuid>> {
        Ok(self.staged.get_user_id_by_token(token_hash, scope))
    }

    async fn has_token(
        &mut self,
        user_id: Uuid,
        token_hash: &str,
        scope: TokenScope,
    ) -> RepoResult<bool> {
        Ok(self.staged.has_token(user_id, token_hash, scope))
    }

    async fn delete_token(
        &mut self,
        user_id: Uuid,
        token_hash: &str,
        scope: TokenScope,
    ) -> RepoResult<()> {
        self.db.check(FailPoint::DeleteToken)?;
        self.staged.delete_token(user_id, token_hash, scope)
    }

    async fn purge_expired_tokens(&mut self) -> RepoResult<u64> {
        Ok(self.staged.purge_expired_tokens())
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn commit(self: Box<Self>) -> RepoResult<()> {
        let MemoryTx {
            db,
            mut guard,
            staged,
        } = *self;
        db.check(FailPoint::Commit)?;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> RepoResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::Duration;

    fn user(email: &str, phone: &str) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            auth: AuthMethod::Password {
                password_hash: "$argon2id$stub".to_string(),
            },
            first_name: "Ada".to_string(),
            last_name: "Obi".to_string(),
            phone_number: phone.to_string(),
            country: "NG".to_string(),
            role: Role::Guest,
            is_verified: false,
            is_enabled: true,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_unique_constraints() {
        let db = MemoryDatabase::new();
        let mut store = db.acquire().await.unwrap();
        let first = user("a@x.com", "+2348012345678");
        store.create_user(&first).await.unwrap();

        let same_email = user("a@x.com", "+2348099999999");
        assert!(matches!(
            store.create_user(&same_email).await,
            Err(RepoError::EmailConflict)
        ));

        let same_phone = user("b@x.com", "+2348012345678");
        assert!(matches!(
            store.create_user(&same_phone).await,
            Err(RepoError::PhoneConflict)
        ));

        let mut same_id = user("c@x.com", "+2348011111111");
        same_id.id = first.id;
        assert!(matches!(
            store.create_user(&same_id).await,
            Err(RepoError::UserIdConflict)
        ));
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let db = MemoryDatabase::new();
        let u = user("a@x.com", "+2348012345678");

        let mut tx = db.begin().await.unwrap();
        tx.create_user(&u).await.unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(db.user_count().await, 0);

        let mut tx = db.begin().await.unwrap();
        tx.create_user(&u).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(db.user_count().await, 1);
    }

    #[tokio::test]
    async fn test_expired_tokens_are_invisible_and_purged() {
        let db = MemoryDatabase::new();
        let u = user("a@x.com", "+2348012345678");
        let mut store = db.acquire().await.unwrap();
        store.create_user(&u).await.unwrap();

        let expired = Token {
            plaintext: "000001".to_string(),
            hash: "h1".to_string(),
            user_id: u.id,
            expires_at: Utc::now() - Duration::seconds(1),
            scope: TokenScope::Activation,
        };
        store.create_token(&expired).await.unwrap();
        assert_eq!(
            store
                .get_user_id_by_token("h1", TokenScope::Activation)
                .await
                .unwrap(),
            None
        );
        assert_eq!(store.purge_expired_tokens().await.unwrap(), 1);
        assert_eq!(db.total_tokens().await, 0);
    }

    #[tokio::test]
    async fn test_same_code_for_different_users() {
        let db = MemoryDatabase::new();
        let ada = user("a@x.com", "+2348012345678");
        let bola = user("b@x.com", "+2348012345679");
        let mut store = db.acquire().await.unwrap();
        store.create_user(&ada).await.unwrap();
        store.create_user(&bola).await.unwrap();

        let code = |owner: Uuid| Token {
            plaintext: "424242".to_string(),
            hash: "h42".to_string(),
            user_id: owner,
            expires_at: Utc::now() + Duration::minutes(5),
            scope: TokenScope::Activation,
        };
        store.create_token(&code(ada.id)).await.unwrap();
        store.create_token(&code(bola.id)).await.unwrap();
        assert!(matches!(
            store.create_token(&code(ada.id)).await,
            Err(RepoError::TokenConflict)
        ));

        store
            .delete_token(ada.id, "h42", TokenScope::Activation)
            .await
            .unwrap();
        assert!(!store
            .has_token(ada.id, "h42", TokenScope::Activation)
            .await
            .unwrap());
        assert!(store
            .has_token(bola.id, "h42", TokenScope::Activation)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_failpoint_fires_once() {
        let db = MemoryDatabase::new();
        db.fail_once(FailPoint::CreateUser);
        let mut store = db.acquire().await.unwrap();
        let u = user("a@x.com", "+2348012345678");
        assert!(matches!(
            store.create_user(&u).await,
            Err(RepoError::Database(_))
        ));
        assert!(store.create_user(&u).await.is_ok());
    }
}
