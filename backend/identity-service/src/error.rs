use crate::db::RepoError;
use thiserror::Error;
use tonic::{Code, Status};

pub type Result<T> = std::result::Result<T, IdentityError>;

/// Outward error taxonomy. Every [`IdentityError`] resolves to exactly one code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidArgument,
    Unauthenticated,
    AlreadyExists,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "invalid_argument",
            ErrorCode::Unauthenticated => "unauthenticated",
            ErrorCode::AlreadyExists => "already_exists",
            ErrorCode::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("invalid or expired token")]
    InvalidActivationToken,

    #[error("user already verified")]
    AlreadyVerified,

    #[error("user not found")]
    UnknownUser,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("incorrect password")]
    IncorrectPassword,

    #[error("invalid or expired refresh token")]
    InvalidRefreshToken,

    #[error("invalid or expired access token")]
    InvalidAccessToken,

    #[error("session is blocked")]
    SessionBlocked,

    #[error("session user mismatch")]
    SessionUserMismatch,

    #[error("invalid or expired session")]
    InvalidSession,

    #[error("link expired or invalid")]
    InvalidResetLink,

    #[error("Email already exists")]
    EmailAlreadyExists,

    #[error("Phone number already exists")]
    PhoneAlreadyExists,

    #[error("Repository error: {0}")]
    Repository(#[source] RepoError),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("JWT error: {0}")]
    JwtError(String),

    #[error("invalid user data: {0}")]
    InvalidUserData(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("{context}: {source}")]
    Context {
        context: &'static str,
        #[source]
        source: Box<IdentityError>,
    },
}

impl IdentityError {
    /// Code attached where the error was detected; wrapping never changes it.
    pub fn code(&self) -> ErrorCode {
        match self {
            IdentityError::Validation(_)
            | IdentityError::InvalidActivationToken
            | IdentityError::AlreadyVerified
            | IdentityError::UnknownUser => ErrorCode::InvalidArgument,

            IdentityError::InvalidCredentials
            | IdentityError::IncorrectPassword
            | IdentityError::InvalidRefreshToken
            | IdentityError::InvalidAccessToken
            | IdentityError::SessionBlocked
            | IdentityError::SessionUserMismatch
            | IdentityError::InvalidSession
            | IdentityError::InvalidResetLink => ErrorCode::Unauthenticated,

            IdentityError::EmailAlreadyExists | IdentityError::PhoneAlreadyExists => {
                ErrorCode::AlreadyExists
            }

            IdentityError::Repository(_)
            | IdentityError::Cache(_)
            | IdentityError::JwtError(_)
            | IdentityError::InvalidUserData(_)
            | IdentityError::Internal(_) => ErrorCode::Internal,

            IdentityError::Context { source, .. } => source.code(),
        }
    }

    /// Wrap with an operation label, keeping the original as the source.
    pub fn context(self, context: &'static str) -> Self {
        IdentityError::Context {
            context,
            source: Box::new(self),
        }
    }

    /// Innermost error of a context chain.
    pub fn root(&self) -> &IdentityError {
        match self {
            IdentityError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Convert to gRPC Status for wire protocol
    pub fn to_status(&self) -> Status {
        let root = self.root();
        match self.code() {
            ErrorCode::InvalidArgument => Status::new(Code::InvalidArgument, root.to_string()),
            ErrorCode::Unauthenticated => Status::new(Code::Unauthenticated, root.to_string()),
            ErrorCode::AlreadyExists => Status::new(Code::AlreadyExists, root.to_string()),
            // Don't leak internal details
            ErrorCode::Internal => Status::new(Code::Internal, "Internal server error"),
        }
    }
}

/// Extension for attaching an operation label to fallible results.
pub trait ResultExt<T> {
    fn context(self, context: &'static str) -> Result<T>;
}

impl<T, E: Into<IdentityError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: &'static str) -> Result<T> {
        self.map_err(|err| err.into().context(context))
    }
}

impl From<RepoError> for IdentityError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::EmailConflict => IdentityError::EmailAlreadyExists,
            RepoError::PhoneConflict => IdentityError::PhoneAlreadyExists,
            other => IdentityError::Repository(other),
        }
    }
}

impl From<redis::RedisError> for IdentityError {
    fn from(err: redis::RedisError) -> Self {
        tracing::error!(error = %err, "redis error");
        IdentityError::Cache(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for IdentityError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        tracing::error!(error = %err, "jwt error");
        IdentityError::JwtError(err.to_string())
    }
}

impl From<validator::ValidationErrors> for IdentityError {
    fn from(err: validator::ValidationErrors) -> Self {
        IdentityError::Validation(err.to_string())
    }
}

impl From<tokio::task::JoinError> for IdentityError {
    fn from(err: tokio::task::JoinError) -> Self {
        IdentityError::Internal(format!("blocking task failed: {}", err))
    }
}

impl From<IdentityError> for Status {
    fn from(err: IdentityError) -> Self {
        err.to_status()
    }
}
