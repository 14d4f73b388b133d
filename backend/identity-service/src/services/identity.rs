//! Identity commands: registration, activation, login sessions and password
//! lifecycle.
//!
//! [`IdentityService`] owns no state of its own. Every multi-step write runs
//! through [`with_transaction`] with the transaction handle passed to each
//! repository call; cache writes and email jobs happen outside the transaction
//! and never undo committed work.

use crate::cache::{access_key, refresh_key, Cache};
use crate::config::TokenSettings;
use crate::db::{with_transaction, Database, RepoError, UserStore};
use crate::error::{IdentityError, Result, ResultExt};
use crate::jobs::{EmailJob, JobDispatcher};
use crate::models::{
    AuthMethod, ProfileUpdate, RegisterRequest, RenewedAccessToken, Role, Session,
    SessionTokens, Token, TokenScope, User,
};
use crate::security::{
    generate_otp, generate_token, hash_token, CredentialHasher, Payload, TokenError, TokenKind,
    TokenMaker, TokenRequest,
};
use crate::validators::{
    mask_email, mask_phone, normalize_phone, validate_password, PASSWORD_BOUNDS_MESSAGE,
};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

/// Draws allowed when a user already holds the generated activation code.
const OTP_ATTEMPTS: u32 = 3;

/// Result of a successful registration. `activation_code` is the only copy of
/// the plaintext OTP.
#[derive(Clone)]
pub struct Registration {
    pub user: User,
    pub activation_code: String,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("user_id", &self.user.id)
            .field("activation_code", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone)]
pub struct IdentityService {
    db: Arc<dyn Database>,
    cache: Arc<dyn Cache>,
    jobs: Arc<dyn JobDispatcher>,
    tokens: Arc<dyn TokenMaker>,
    settings: TokenSettings,
    hasher: CredentialHasher,
}

impl IdentityService {
    pub fn new(
        db: Arc<dyn Database>,
        cache: Arc<dyn Cache>,
        jobs: Arc<dyn JobDispatcher>,
        tokens: Arc<dyn TokenMaker>,
        settings: TokenSettings,
        hasher: CredentialHasher,
    ) -> Self {
        Self {
            db,
            cache,
            jobs,
            tokens,
            settings,
            hasher,
        }
    }

    /// Create an unverified guest account and its first activation code.
    ///
    /// The user row and the activation token are written in one transaction.
    /// A user-id collision is retried once with a fresh id. The welcome email
    /// is queued after commit; a queueing failure is logged only.
    pub async fn register(&self, request: RegisterRequest) -> Result<Registration> {
        let request = request.normalized();
        request.validate()?;
        let phone_number = normalize_phone(&request.phone_number, &request.country)
            .map_err(|e| IdentityError::Validation(e.to_string()))?;

        let password_hash = self
            .hasher
            .hash_blocking(request.password)
            .await
            .context("hash password")?;

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: request.email,
            auth: AuthMethod::Password { password_hash },
            first_name: request.first_name,
            last_name: request.last_name,
            phone_number,
            country: request.country,
            role: Role::Guest,
            is_verified: false,
            is_enabled: true,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        let activation_ttl = self.settings.activation_ttl();

        let (user, otp) = with_transaction(self.db.as_ref(), move |tx| {
            Box::pin(async move {
                let mut user = user;
                let mut retried = false;
                loop {
                    match tx.create_user(&user).await {
                        Ok(()) => break,
                        Err(RepoError::UserIdConflict) if !retried => {
                            warn!(user_id = %user.id, "user id collision, retrying with a new id");
                            retried = true;
                            user.id = Uuid::new_v4();
                        }
                        Err(err) => return Err(IdentityError::from(err).context("create user")),
                    }
                }

                let otp = store_activation_code(&mut *tx, user.id, activation_ttl).await?;
                Ok((user, otp))
            })
        })
        .await
        .context("register")?;

        info!(
            event = "user.register",
            user_id = %user.id,
            email = %mask_email(&user.email),
            phone = %mask_phone(&user.phone_number),
            "user registered"
        );

        self.dispatch(EmailJob::Welcome {
            user_id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            code: otp.plaintext.clone(),
        })
        .await;

        Ok(Registration {
            user,
            activation_code: otp.plaintext,
        })
    }

    /// Mark `user_id` verified using an activation code issued to that user.
    ///
    /// Codes are matched against the caller's own tokens only; the same six
    /// digits held by another user do not count.
    pub async fn activate(&self, user_id: Uuid, code: &str) -> Result<()> {
        let token_hash = hash_token(code.trim());

        with_transaction(self.db.as_ref(), move |tx| {
            Box::pin(async move {
                let owned = tx
                    .has_token(user_id, &token_hash, TokenScope::Activation)
                    .await
                    .context("look up activation token")?;
                if !owned {
                    return Err(IdentityError::InvalidActivationToken);
                }

                tx.verify_user(user_id).await.map_err(activation_error)?;
                tx.delete_token(user_id, &token_hash, TokenScope::Activation)
                    .await
                    .map_err(activation_error)?;
                Ok(())
            })
        })
        .await
        .context("activate")?;

        info!(event = "user.activate", user_id = %user_id, "user activated");
        Ok(())
    }

    /// Issue another activation code. Earlier codes stay valid until they expire.
    pub async fn resend_activation(&self, user_id: Uuid) -> Result<()> {
        let mut store = self.db.acquire().await.context("acquire connection")?;
        let user = store
            .get_user_by_id(user_id)
            .await
            .context("load user")?
            .ok_or(IdentityError::UnknownUser)?;

        if user.is_verified {
            return Err(IdentityError::AlreadyVerified);
        }

        let otp =
            store_activation_code(store.as_mut(), user.id, self.settings.activation_ttl()).await?;
        drop(store);

        info!(event = "user.resend_activation", user_id = %user.id, "activation code reissued");

        self.dispatch(EmailJob::ActivationCode {
            user_id: user.id,
            email: user.email,
            first_name: user.first_name,
            code: otp.plaintext,
        })
        .await;
        Ok(())
    }

    /// Check an email/password pair.
    ///
    /// Unknown email and wrong password fail identically; the unknown-email
    /// path still runs a full hash verification.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User> {
        let email = email.trim().to_ascii_lowercase();
        if email.is_empty() || password.is_empty() {
            return Err(IdentityError::Validation(
                "email and password are required".to_string(),
            ));
        }

        let user = {
            let mut store = self.db.acquire().await.context("acquire connection")?;
            store.get_user_by_email(&email).await.context("load user")?
        };

        let Some(user) = user else {
            self.hasher
                .verify_decoy_blocking(password.to_string())
                .await
                .context("verify password")?;
            debug!(email = %mask_email(&email), "login for unknown email");
            return Err(IdentityError::InvalidCredentials);
        };

        let password_hash = match user.password_hash() {
            Some(hash) => hash.to_string(),
            None => {
                error!(user_id = %user.id, "password login attempted on federated account");
                return Err(IdentityError::InvalidUserData(
                    "account has no local password".to_string(),
                ));
            }
        };

        let matches = self
            .hasher
            .verify_blocking(password_hash, password.to_string())
            .await
            .context("verify password")?;
        if !matches {
            info!(event = "user.login_failed", user_id = %user.id, "password mismatch");
            return Err(IdentityError::InvalidCredentials);
        }

        info!(event = "user.login", user_id = %user.id, "user authenticated");
        Ok(user)
    }

    /// Issue an access/refresh pair for an authenticated user and record the
    /// session. Cache failures abort the call.
    pub async fn create_session(
        &self,
        user: &User,
        user_agent: &str,
        client_ip: &str,
    ) -> Result<SessionTokens> {
        let (refresh_token, refresh) = self
            .issue(user.id, user.role, TokenKind::Refresh, None, self.settings.refresh_ttl())
            .context("issue refresh token")?;
        let session_id = refresh.id;
        let (access_token, access) = self
            .issue(
                user.id,
                user.role,
                TokenKind::Access,
                Some(session_id),
                self.settings.access_ttl(),
            )
            .context("issue access token")?;

        if let Err(err) = self.cache_session(user.id, &access, &refresh).await {
            self.evict_session_keys(user.id, session_id).await;
            return Err(err);
        }

        let session = Session {
            id: session_id,
            user_id: user.id,
            refresh_token_hash: hash_token(&refresh_token),
            user_agent: user_agent.to_string(),
            client_ip: client_ip.to_string(),
            is_blocked: false,
            expires_at: refresh.expires_at,
            created_at: Utc::now(),
        };

        if let Err(err) = self.store_session(&session).await {
            self.evict_session_keys(user.id, session.id).await;
            return Err(IdentityError::from(err).context("store session"));
        }

        info!(
            event = "session.create",
            user_id = %user.id,
            session_id = %session.id,
            "session created"
        );

        Ok(SessionTokens {
            session_id: session.id,
            access_token,
            access_token_expires_at: access.expires_at,
            refresh_token,
            refresh_token_expires_at: refresh.expires_at,
        })
    }

    /// Verify a refresh token string. The result feeds [`Self::renew_access_token`].
    pub fn verify_refresh_token(&self, refresh_token: &str) -> Result<Payload> {
        let payload = self
            .tokens
            .verify_token(refresh_token)
            .map_err(|err| verification_error(err, IdentityError::InvalidRefreshToken))?;
        if payload.kind != TokenKind::Refresh {
            return Err(IdentityError::InvalidRefreshToken);
        }
        Ok(payload)
    }

    /// Mint a new access token from a verified refresh payload. The refresh
    /// token and its session are left as they are.
    pub async fn renew_access_token(&self, refresh: &Payload) -> Result<RenewedAccessToken> {
        if refresh.kind != TokenKind::Refresh {
            return Err(IdentityError::InvalidRefreshToken);
        }

        let session = {
            let mut store = self.db.acquire().await.context("acquire connection")?;
            store
                .get_session(refresh.id)
                .await
                .context("load session")?
                .ok_or(IdentityError::InvalidRefreshToken)?
        };

        if session.is_blocked {
            return Err(IdentityError::SessionBlocked);
        }
        if session.user_id != refresh.user_id {
            warn!(
                session_id = %session.id,
                claimed_user_id = %refresh.user_id,
                "refresh token user does not own the session"
            );
            return Err(IdentityError::SessionUserMismatch);
        }
        if session.is_expired() {
            return Err(IdentityError::InvalidRefreshToken);
        }

        let (access_token, access) = self
            .issue(
                session.user_id,
                refresh.role,
                TokenKind::Access,
                Some(session.id),
                self.settings.access_ttl(),
            )
            .context("issue access token")?;

        // the newest access token of a session is the only live one
        self.cache
            .set(
                &access_key(session.user_id, session.id),
                &access.id.to_string(),
                access.remaining(),
            )
            .await
            .context("cache access token")?;

        debug!(
            event = "session.renew",
            user_id = %session.user_id,
            session_id = %session.id,
            "access token renewed"
        );

        Ok(RenewedAccessToken {
            access_token,
            access_token_expires_at: access.expires_at,
        })
    }

    /// Log out: block the session holding `refresh_token`, then drop that
    /// session's cached markers. Other sessions of the user stay live.
    pub async fn block_session(&self, user_id: Uuid, refresh_token: &str) -> Result<()> {
        let refresh_token_hash = hash_token(refresh_token);

        let session_id = {
            let mut store = self.db.acquire().await.context("acquire connection")?;
            match store.block_session(user_id, &refresh_token_hash).await {
                Ok(session_id) => session_id,
                Err(RepoError::SessionNotFound) => return Err(IdentityError::InvalidSession),
                Err(err) => return Err(IdentityError::from(err).context("block session")),
            }
        };

        self.evict_session_keys(user_id, session_id).await;

        info!(
            event = "session.block",
            user_id = %user_id,
            session_id = %session_id,
            "session blocked"
        );
        Ok(())
    }

    /// Check a bearer access token against its signature and the session
    /// marker in the cache. The marker must name this token's `jti`: a
    /// logged-out session has no marker and a renewed one names its newer
    /// token.
    pub async fn verify_access_token(&self, access_token: &str) -> Result<Payload> {
        let payload = self
            .tokens
            .verify_token(access_token)
            .map_err(|err| verification_error(err, IdentityError::InvalidAccessToken))?;
        if payload.kind != TokenKind::Access {
            return Err(IdentityError::InvalidAccessToken);
        }
        let session_id = payload
            .session_id
            .ok_or(IdentityError::InvalidAccessToken)?;

        let marker = self
            .cache
            .get(&access_key(payload.user_id, session_id))
            .await
            .context("read access marker")?;
        if marker.as_deref() != Some(payload.id.to_string().as_str()) {
            return Err(IdentityError::InvalidAccessToken);
        }
        Ok(payload)
    }

    /// Start a password reset. Unknown emails and federated accounts get the
    /// same empty success as a real request.
    pub async fn forgot_password(&self, email: &str) -> Result<()> {
        let email = email.trim().to_ascii_lowercase();

        let mut store = self.db.acquire().await.context("acquire connection")?;
        let user = match store.get_user_by_email(&email).await.context("load user")? {
            Some(user) if !user.is_federated() => user,
            Some(user) => {
                debug!(user_id = %user.id, "password reset requested for federated account");
                return Ok(());
            }
            None => {
                debug!(email = %mask_email(&email), "password reset requested for unknown email");
                return Ok(());
            }
        };

        let token = generate_token(
            user.id,
            self.settings.password_reset_ttl(),
            TokenScope::PasswordReset,
        )?;
        store
            .create_token(&token)
            .await
            .context("store reset token")?;
        drop(store);

        info!(event = "user.forgot_password", user_id = %user.id, "password reset issued");

        self.dispatch(EmailJob::PasswordReset {
            user_id: user.id,
            email: user.email,
            first_name: user.first_name,
            token: token.plaintext,
        })
        .await;
        Ok(())
    }

    /// Replace the password of the owner of a reset token and consume the token.
    pub async fn reset_password(&self, new_password: &str, token: &str) -> Result<()> {
        validate_new_password(new_password)?;
        let password_hash = self
            .hasher
            .hash_blocking(new_password.to_string())
            .await
            .context("hash password")?;
        let token_hash = hash_token(token.trim());

        let user_id = with_transaction(self.db.as_ref(), move |tx| {
            Box::pin(async move {
                let user_id = tx
                    .get_user_id_by_token(&token_hash, TokenScope::PasswordReset)
                    .await
                    .context("look up reset token")?
                    .ok_or(IdentityError::InvalidResetLink)?;

                match tx
                    .delete_token(user_id, &token_hash, TokenScope::PasswordReset)
                    .await
                {
                    Ok(()) => {}
                    Err(RepoError::TokenNotFound) => return Err(IdentityError::InvalidResetLink),
                    Err(err) => return Err(IdentityError::from(err).context("consume reset token")),
                }

                match tx.update_password(user_id, &password_hash).await {
                    Ok(()) => Ok(user_id),
                    Err(RepoError::UserNotFound) => Err(IdentityError::InvalidResetLink),
                    Err(err) => Err(IdentityError::from(err).context("update password")),
                }
            })
        })
        .await
        .context("reset password")?;

        info!(event = "user.reset_password", user_id = %user_id, "password reset");
        Ok(())
    }

    /// Change the password of an authenticated user.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        validate_new_password(new_password)?;
        let hasher = self.hasher.clone();
        let old_password = old_password.to_string();
        let new_password = new_password.to_string();

        with_transaction(self.db.as_ref(), move |tx| {
            Box::pin(async move {
                let user = tx
                    .get_user_by_id(user_id)
                    .await
                    .context("load user")?
                    .ok_or_else(|| {
                        IdentityError::InvalidUserData(format!(
                            "authenticated user {} not found",
                            user_id
                        ))
                    })?;

                let current_hash = user.password_hash().map(str::to_string).ok_or_else(|| {
                    IdentityError::InvalidUserData("account has no local password".to_string())
                })?;

                if !hasher
                    .verify_blocking(current_hash, old_password)
                    .await
                    .context("verify password")?
                {
                    return Err(IdentityError::IncorrectPassword);
                }

                let new_hash = hasher
                    .hash_blocking(new_password)
                    .await
                    .context("hash password")?;
                tx.update_password(user_id, &new_hash)
                    .await
                    .context("update password")?;
                Ok(())
            })
        })
        .await
        .context("change password")?;

        info!(event = "user.change_password", user_id = %user_id, "password changed");
        Ok(())
    }

    /// Apply a partial profile update. Phone and country are re-validated
    /// together whenever either changes.
    pub async fn update_profile(&self, user_id: Uuid, changes: ProfileUpdate) -> Result<User> {
        let changes = changes.normalized();
        changes.validate()?;
        if changes.is_empty() {
            return Err(IdentityError::Validation("no profile fields to update".to_string()));
        }

        let user = with_transaction(self.db.as_ref(), move |tx| {
            Box::pin(async move {
                let mut user = tx
                    .get_user_by_id(user_id)
                    .await
                    .context("load user")?
                    .ok_or_else(|| {
                        IdentityError::InvalidUserData(format!(
                            "authenticated user {} not found",
                            user_id
                        ))
                    })?;

                if let Some(first_name) = changes.first_name {
                    user.first_name = first_name;
                }
                if let Some(last_name) = changes.last_name {
                    user.last_name = last_name;
                }
                if changes.phone_number.is_some() || changes.country.is_some() {
                    let country = changes.country.unwrap_or_else(|| user.country.clone());
                    let raw_phone = changes
                        .phone_number
                        .unwrap_or_else(|| user.phone_number.clone());
                    user.phone_number = normalize_phone(&raw_phone, &country)
                        .map_err(|e| IdentityError::Validation(e.to_string()))?;
                    user.country = country;
                }
                user.updated_at = Utc::now();

                tx.update_user(&user).await.context("update user")?;
                Ok(user)
            })
        })
        .await
        .context("update profile")?;

        info!(
            event = "user.update_profile",
            user_id = %user.id,
            phone = %mask_phone(&user.phone_number),
            "profile updated"
        );
        Ok(user)
    }

    fn issue(
        &self,
        user_id: Uuid,
        role: Role,
        kind: TokenKind,
        session_id: Option<Uuid>,
        ttl: chrono::Duration,
    ) -> Result<(String, Payload)> {
        self.tokens
            .generate_token(&TokenRequest {
                user_id,
                role,
                kind,
                ttl,
                session_id,
            })
            .map_err(|err| IdentityError::JwtError(err.to_string()))
    }

    async fn store_session(&self, session: &Session) -> std::result::Result<(), RepoError> {
        let mut store = self.db.acquire().await?;
        store.create_session(session).await
    }

    async fn cache_session(
        &self,
        user_id: Uuid,
        access: &Payload,
        refresh: &Payload,
    ) -> Result<()> {
        self.cache
            .set(
                &access_key(user_id, refresh.id),
                &access.id.to_string(),
                access.remaining(),
            )
            .await
            .context("cache access token")?;
        self.cache
            .set(
                &refresh_key(user_id, refresh.id),
                &refresh.id.to_string(),
                refresh.remaining(),
            )
            .await
            .context("cache refresh token")
    }

    async fn evict_session_keys(&self, user_id: Uuid, session_id: Uuid) {
        for key in [access_key(user_id, session_id), refresh_key(user_id, session_id)] {
            if let Err(err) = self.cache.delete(&key).await {
                warn!(user_id = %user_id, key = %key, error = %err, "cache eviction failed");
            }
        }
    }

    async fn dispatch(&self, job: EmailJob) {
        let job_type = job.job_type();
        let user_id = job.user_id();
        if let Err(err) = self.jobs.enqueue(job).await {
            error!(
                user_id = %user_id,
                job_type,
                error = %err,
                "failed to enqueue email job"
            );
        }
    }
}

/// Store a fresh activation code for `user_id`, drawing again when the user
/// already holds the same digest.
async fn store_activation_code<S>(
    store: &mut S,
    user_id: Uuid,
    ttl: chrono::Duration,
) -> Result<Token>
where
    S: UserStore + ?Sized,
{
    let mut attempt = 1;
    loop {
        let otp = generate_otp(user_id, ttl, TokenScope::Activation)?;
        match store.create_token(&otp).await {
            Ok(()) => return Ok(otp),
            Err(RepoError::TokenConflict) if attempt < OTP_ATTEMPTS => {
                debug!(user_id = %user_id, attempt, "activation code already held, drawing again");
                attempt += 1;
            }
            Err(err) => return Err(IdentityError::from(err).context("store activation token")),
        }
    }
}

fn activation_error(err: RepoError) -> IdentityError {
    match err {
        RepoError::TokenNotFound | RepoError::UserNotFound => IdentityError::InvalidActivationToken,
        other => IdentityError::from(other).context("activate user"),
    }
}

/// Expired or malformed tokens map to `rejected`; key problems are internal.
fn verification_error(err: TokenError, rejected: IdentityError) -> IdentityError {
    match err {
        TokenError::Expired | TokenError::Invalid(_) => rejected,
        TokenError::Signing(_) | TokenError::InvalidKey(_) => {
            IdentityError::JwtError(err.to_string())
        }
    }
}

fn validate_new_password(password: &str) -> Result<()> {
    if !validate_password(password) {
        return Err(IdentityError::Validation(
            PASSWORD_BOUNDS_MESSAGE.to_string(),
        ));
    }
    Ok(())
}
