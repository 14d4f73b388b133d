/// Service layer for the identity service
///
/// - Identity commands (registration, sessions, password lifecycle)
/// - Email service (SMTP delivery of queued email jobs)
pub mod email;
pub mod identity;

pub use email::EmailService;
pub use identity::{IdentityService, Registration};
