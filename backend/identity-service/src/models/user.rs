use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

/// Storefront role. The set is closed; unknown strings are rejected by [`Role::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Guest,
    Customer,
    Staff,
    StoreOwner,
    Admin,
    SystemAdmin,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Guest,
        Role::Customer,
        Role::Staff,
        Role::StoreOwner,
        Role::Admin,
        Role::SystemAdmin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::Customer => "customer",
            Role::Staff => "staff",
            Role::StoreOwner => "store_owner",
            Role::Admin => "admin",
            Role::SystemAdmin => "system_admin",
        }
    }

    pub fn parse(s: &str) -> Result<Self, UnknownRole> {
        match s.trim().to_ascii_lowercase().as_str() {
            "guest" => Ok(Role::Guest),
            "customer" => Ok(Role::Customer),
            "staff" => Ok(Role::Staff),
            "store_owner" | "store-owner" => Ok(Role::StoreOwner),
            "admin" => Ok(Role::Admin),
            "system_admin" | "system-admin" => Ok(Role::SystemAdmin),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::parse(s)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a user proves their identity. A user has exactly one of the two:
/// a local password digest, or a link to a federated identity provider.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Password { password_hash: String },
    Federated { provider: String, provider_id: String },
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password { .. } => f
                .debug_struct("Password")
                .field("password_hash", &"[REDACTED]")
                .finish(),
            AuthMethod::Federated {
                provider,
                provider_id,
            } => f
                .debug_struct("Federated")
                .field("provider", provider)
                .field("provider_id", provider_id)
                .finish(),
        }
    }
}

/// User model - core identity entity
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub auth: AuthMethod,
    pub first_name: String,
    pub last_name: String,
    /// E.164, e.g. `+2348012345678`
    pub phone_number: String,
    /// ISO 3166-1 alpha-2
    pub country: String,
    pub role: Role,
    pub is_verified: bool,
    pub is_enabled: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn password_hash(&self) -> Option<&str> {
        match &self.auth {
            AuthMethod::Password { password_hash } => Some(password_hash.as_str()),
            AuthMethod::Federated { .. } => None,
        }
    }

    pub fn is_federated(&self) -> bool {
        matches!(self.auth, AuthMethod::Federated { .. })
    }
}

/// Registration input for a local (password) account.
#[derive(Clone, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 100, message = "first name must be 1-100 characters"))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100, message = "last name must be 1-100 characters"))]
    pub last_name: String,
    #[validate(email(message = "invalid email address"), length(max = 254))]
    pub email: String,
    #[validate(custom(function = "crate::validators::password_field"))]
    pub password: String,
    #[validate(length(min = 1, max = 32, message = "phone number is required"))]
    pub phone_number: String,
    #[validate(length(equal = 2, message = "country must be an ISO 3166-1 alpha-2 code"))]
    pub country: String,
}

impl RegisterRequest {
    /// Trim surrounding whitespace and canonicalise case; the password is left untouched.
    pub fn normalized(self) -> Self {
        Self {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            email: self.email.trim().to_ascii_lowercase(),
            password: self.password,
            phone_number: self.phone_number.trim().to_string(),
            country: self.country.trim().to_ascii_uppercase(),
        }
    }
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("phone_number", &self.phone_number)
            .field("country", &self.country)
            .finish()
    }
}

/// Partial profile update; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ProfileUpdate {
    #[validate(length(min = 1, max = 100, message = "first name must be 1-100 characters"))]
    pub first_name: Option<String>,
    #[validate(length(min = 1, max = 100, message = "last name must be 1-100 characters"))]
    pub last_name: Option<String>,
    #[validate(length(min = 1, max = 32, message = "phone number is required"))]
    pub phone_number: Option<String>,
    #[validate(length(equal = 2, message = "country must be an ISO 3166-1 alpha-2 code"))]
    pub country: Option<String>,
}

impl ProfileUpdate {
    pub fn normalized(self) -> Self {
        Self {
            first_name: self.first_name.map(|s| s.trim().to_string()),
            last_name: self.last_name.map(|s| s.trim().to_string()),
            phone_number: self.phone_number.map(|s| s.trim().to_string()),
            country: self.country.map(|s| s.trim().to_ascii_uppercase()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.phone_number.is_none()
            && self.country.is_none()
    }
}
