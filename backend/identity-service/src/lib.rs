/// Storefront Identity Library
///
/// Account registration, activation, login sessions and password lifecycle for
/// a multi-tenant storefront.
///
/// ## Modules
///
/// - `boundary`: Status conversion and panic containment for transports
/// - `cache`: Session markers (Redis or in-process)
/// - `config`: Service configuration
/// - `db`: Repository traits, Postgres and in-process stores, transactions
/// - `error`: Error types
/// - `jobs`: Email job queue and worker
/// - `models`: Data models
/// - `security`: Password hashing, one-time tokens, signed bearer tokens
/// - `services`: Identity commands and email delivery
/// - `validators`: Input validation and normalization
pub mod boundary;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod models;
pub mod security;
pub mod services;
pub mod validators;

// Re-export commonly used types
pub use error::{ErrorCode, IdentityError, Result};
pub use services::{IdentityService, Registration};
