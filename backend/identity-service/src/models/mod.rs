/// Data models for identity and session lifecycle
pub mod session;
pub mod token;
pub mod user;

pub use session::{RenewedAccessToken, Session, SessionTokens};
pub use token::{Token, TokenScope};
pub use user::{AuthMethod, ProfileUpdate, RegisterRequest, Role, UnknownRole, User};
