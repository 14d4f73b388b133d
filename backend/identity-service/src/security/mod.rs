/// Security primitives: password hashing, one-time tokens, signed bearer tokens
pub mod jwt;
pub mod password;
pub mod tokens;

pub use jwt::{JwtMaker, Payload, TokenError, TokenKind, TokenMaker, TokenRequest};
pub use password::CredentialHasher;
pub use tokens::{generate_otp, generate_token, hash_token};
