//! Plain text email delivery through the shared SMTP transport.

use crate::AppResources;
use lettre::message::header::ContentType;
use lettre::{AsyncTransport, Message};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("SMTP delivery is disabled")]
    Disabled,
    #[error("Invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("Failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

/// Body of a notification email: the message followed by a link back to the UI.
pub fn render_body(title: &str, message: &str, frontend_url: &str) -> String {
    format!(
        "{title}\n\n{message}\n\n--\nOpen the monitoring console: {frontend_url}\n\
         You receive this email because notifications are enabled for your account.\n"
    )
}

#[tracing::instrument(skip(resources, body))]
pub async fn send_plain(
    resources: &AppResources,
    to: &str,
    subject: &str,
    body: String,
) -> Result<(), EmailError> {
    if !resources.config.smtp.enabled {
        return Err(EmailError::Disabled);
    }
    let email = Message::builder()
        .from(resources.config.smtp.from.parse()?)
        .to(to.parse()?)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body)?;

    resources.mailer.send(email).await?;
    tracing::info!(
        name = "notifications.email.sent",
        target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
        subject = %subject,
        message = "Notification email sent"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_contains_message_and_link() {
        let body = render_body(
            "Critical alert at ST-01",
            "Temperature 48.2 celsius exceeds 45",
            "https://monitor.example.org",
        );
        assert!(body.starts_with("Critical alert at ST-01\n\n"));
        assert!(body.contains("Temperature 48.2 celsius exceeds 45"));
        assert!(body.contains("https://monitor.example.org"));
    }
}
