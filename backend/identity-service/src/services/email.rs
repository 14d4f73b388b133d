/// Email service for welcome, activation code and password reset mail
use crate::config::EmailSettings;
use crate::error::{IdentityError, Result};
use crate::jobs::{EmailJob, JobHandler};
use crate::validators::mask_email;
use askama::Template;
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_RESET_BASE_URL: &str = "https://storefront.dev/reset-password";

/// Async email transport wrapper (SMTP or no-op)
#[derive(Clone)]
pub struct EmailService {
    transport: Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>,
    from: Mailbox,
    password_reset_base_url: Option<String>,
}

impl EmailService {
    /// Build email service from configuration
    ///
    /// If SMTP host is empty, operates in no-op mode (logs only).
    pub fn new(config: &EmailSettings) -> Result<Self> {
        let from = config
            .smtp_from
            .parse::<Mailbox>()
            .map_err(|e| IdentityError::Internal(format!("Invalid SMTP_FROM address: {}", e)))?;

        let transport = if config.smtp_host.trim().is_empty() {
            warn!("SMTP host not configured; email service will operate in no-op mode");
            None
        } else {
            let builder = if config.use_starttls {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            }
            .map_err(|e| {
                IdentityError::Internal(format!("Failed to configure SMTP transport: {}", e))
            })?
            .port(config.smtp_port);

            let builder = if let (Some(username), Some(password)) =
                (&config.smtp_username, &config.smtp_password)
            {
                builder.credentials(Credentials::new(username.to_string(), password.to_string()))
            } else {
                builder
            };

            Some(Arc::new(builder.build()))
        };

        Ok(Self {
            transport,
            from,
            password_reset_base_url: config.password_reset_base_url.clone(),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    pub async fn send_welcome_email(&self, recipient: &str, first_name: &str, code: &str) -> Result<()> {
        let text = render(&WelcomeText { first_name, code })?;
        let html = render(&WelcomeHtml { first_name, code })?;
        self.deliver(
            recipient,
            "Welcome to Storefront",
            Body::Alternative {
                text: &text,
                html: &html,
            },
        )
        .await
    }

    pub async fn send_activation_code(&self, recipient: &str, first_name: &str, code: &str) -> Result<()> {
        let text = render(&ActivationCodeText { first_name, code })?;
        self.deliver(recipient, "Your Storefront activation code", Body::Text(&text))
            .await
    }

    pub async fn send_password_reset_email(
        &self,
        recipient: &str,
        first_name: &str,
        token: &str,
    ) -> Result<()> {
        let link = self.build_password_reset_link(token);
        let (text, html) = password_reset_bodies(first_name, &link)?;
        self.deliver(
            recipient,
            "Storefront password reset",
            Body::Alternative {
                text: &text,
                html: &html,
            },
        )
        .await
    }

    fn build_password_reset_link(&self, token: &str) -> String {
        match &self.password_reset_base_url {
            Some(base) if !base.is_empty() => format!("{base}?token={token}"),
            _ => format!("{DEFAULT_RESET_BASE_URL}?token={token}"),
        }
    }

    async fn deliver(&self, recipient: &str, subject: &str, body: Body<'_>) -> Result<()> {
        let Some(transport) = &self.transport else {
            info!(
                subject,
                recipient = %mask_email(recipient),
                "mail transport disabled, dropping message"
            );
            return Ok(());
        };

        let builder = Message::builder()
            .from(self.from.clone())
            .to(parse_recipient(recipient)?)
            .subject(subject);
        let message = match body {
            Body::Text(text) => builder
                .header(header::ContentType::TEXT_PLAIN)
                .body(text.to_string()),
            Body::Alternative { text, html } => builder.multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(text.to_string()))
                    .singlepart(SinglePart::html(html.to_string())),
            ),
        }
        .map_err(|e| IdentityError::Internal(format!("compose {subject:?}: {e}")))?;

        transport
            .send(message)
            .await
            .map_err(|e| IdentityError::Internal(format!("smtp delivery failed: {e}")))?;
        info!(subject, recipient = %mask_email(recipient), "mail delivered");
        Ok(())
    }
}

#[derive(Template)]
#[template(path = "email/welcome.html")]
struct WelcomeHtml<'a> {
    first_name: &'a str,
    code: &'a str,
}

#[derive(Template)]
#[template(path = "email/welcome.txt")]
struct WelcomeText<'a> {
    first_name: &'a str,
    code: &'a str,
}

#[derive(Template)]
#[template(path = "email/activation_code.txt")]
struct ActivationCodeText<'a> {
    first_name: &'a str,
    code: &'a str,
}

#[derive(Template)]
#[template(path = "email/password_reset.html")]
struct PasswordResetHtml<'a> {
    first_name: &'a str,
    link: &'a str,
}

#[derive(Template)]
#[template(path = "email/password_reset.txt")]
struct PasswordResetText<'a> {
    first_name: &'a str,
    link: &'a str,
}

/// Plain and HTML bodies of the reset mail; the HTML one escapes user input.
fn password_reset_bodies(first_name: &str, link: &str) -> Result<(String, String)> {
    let text = render(&PasswordResetText { first_name, link })?;
    let html = render(&PasswordResetHtml { first_name, link })?;
    Ok((text, html))
}

fn render<T: Template>(template: &T) -> Result<String> {
    template
        .render()
        .map_err(|e| IdentityError::Internal(format!("render email template: {}", e)))
}

enum Body<'a> {
    Text(&'a str),
    Alternative { text: &'a str, html: &'a str },
}

fn parse_recipient(recipient: &str) -> Result<Mailbox> {
    recipient
        .parse::<Mailbox>()
        .map_err(|e| IdentityError::Internal(format!("Invalid recipient email address: {}", e)))
}

#[async_trait]
impl JobHandler for EmailService {
    async fn handle(&self, job: &EmailJob) -> Result<()> {
        match job {
            EmailJob::Welcome {
                email,
                first_name,
                code,
                ..
            } => self.send_welcome_email(email, first_name, code).await,
            EmailJob::ActivationCode {
                email,
                first_name,
                code,
                ..
            } => self.send_activation_code(email, first_name, code).await,
            EmailJob::PasswordReset {
                email,
                first_name,
                token,
                ..
            } => self.send_password_reset_email(email, first_name, token).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn settings(reset_url: Option<&str>) -> EmailSettings {
        EmailSettings {
            smtp_host: String::new(),
            smtp_port: 1025,
            smtp_username: None,
            smtp_password: None,
            smtp_from: "noreply@storefront.dev".to_string(),
            use_starttls: false,
            password_reset_base_url: reset_url.map(str::to_string),
        }
    }

    #[test]
    fn test_reset_link_uses_configured_base() {
        let service = EmailService::new(&settings(Some("https://shop.example/reset"))).unwrap();
        assert_eq!(
            service.build_password_reset_link("abc"),
            "https://shop.example/reset?token=abc"
        );

        let service = EmailService::new(&settings(None)).unwrap();
        assert!(service
            .build_password_reset_link("abc")
            .starts_with(DEFAULT_RESET_BASE_URL));
    }

    #[test]
    fn test_markup_in_first_name_is_escaped() {
        let first_name = r#"<a href="http://evil.example">claim your prize</a>"#;

        let html = render(&WelcomeHtml {
            first_name,
            code: "123456",
        })
        .unwrap();
        assert!(html.contains("&lt;a href="));
        assert!(!html.contains(r#"<a href="http://evil"#));
        assert!(html.contains("123456"));

        let (text, html) =
            password_reset_bodies(first_name, "https://shop.example/reset?token=abc").unwrap();
        assert!(html.contains("&lt;a href="));
        assert!(!html.contains(r#"<a href="http://evil"#));
        assert!(html.contains(r#"<a href="https://shop.example/reset?token=abc""#));
        assert!(text.contains(first_name));
    }

    #[test]
    fn test_invalid_from_address() {
        let mut config = settings(None);
        config.smtp_from = "not an address".to_string();
        assert!(EmailService::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_noop_mode_handles_every_job() {
        let service = EmailService::new(&settings(None)).unwrap();
        assert!(!service.is_enabled());

        let user_id = Uuid::new_v4();
        let jobs = [
            EmailJob::Welcome {
                user_id,
                email: "ada@example.com".into(),
                first_name: "Ada".into(),
                code: "123456".into(),
            },
            EmailJob::ActivationCode {
                user_id,
                email: "ada@example.com".into(),
                first_name: "Ada".into(),
                code: "654321".into(),
            },
            EmailJob::PasswordReset {
                user_id,
                email: "ada@example.com".into(),
                first_name: "Ada".into(),
                token: "reset-token".into(),
            },
        ];
        for job in &jobs {
            service.handle(job).await.unwrap();
        }
    }
}
