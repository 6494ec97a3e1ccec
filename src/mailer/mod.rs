use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    address::AddressError,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// A rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text_body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("invalid mailbox: {0}")]
    Address(#[from] AddressError),
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp delivery failed: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), MailError>;
}

pub fn welcome_email(sender: &str, recipient: &str, user_id: i64, activation_token: &str) -> Email {
    Email {
        from: sender.to_string(),
        to: recipient.to_string(),
        subject: "Welcome to Marquee!".to_string(),
        text_body: format!(
            "Hi,\n\n\
             Thanks for signing up for a Marquee account. Your user ID number is {user_id}.\n\n\
             Please send a request to the `PUT /v1/users/activated` endpoint with the \
             following JSON body to activate your account:\n\n\
             {{\"token\": \"{activation_token}\"}}\n\n\
             Please note that this is a one-time use token and it will expire in 3 days.\n\n\
             Thanks,\n\nThe Marquee Team\n"
        ),
    }
}

/// SMTP connection settings.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Delivers messages through an SMTP relay, upgrading the connection with
/// STARTTLS.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    pub fn new(settings: SmtpSettings) -> Result<Self, MailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
            .port(settings.port)
            .timeout(Some(SEND_TIMEOUT));
        if let Some(username) = settings.username {
            builder = builder.credentials(Credentials::new(
                username,
                settings.password.unwrap_or_default(),
            ));
        }
        Ok(Self {
            transport: builder.build(),
        })
    }
}

fn build_message(email: Email) -> Result<Message, MailError> {
    let message = Message::builder()
        .from(email.from.parse::<Mailbox>()?)
        .to(email.to.parse::<Mailbox>()?)
        .subject(email.subject)
        .header(ContentType::TEXT_PLAIN)
        .body(email.text_body)?;
    Ok(message)
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        let to = email.to.clone();
        let message = build_message(email)?;
        self.transport.send(message).await?;
        tracing::info!(to = %to, "email delivered");
        Ok(())
    }
}

/// Writes messages to the log instead of delivering them.
#[derive(Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        tracing::info!(
            from = %email.from,
            to = %email.to,
            subject = %email.subject,
            body = %email.text_body,
            "email not delivered, no relay configured"
        );
        Ok(())
    }
}
