//! Entrega de e-mail pelo log.
//!
//! Sem transporte SMTP o daemon registra a mensagem completa; o
//! escalador só chega aqui com `mail.suppress_send = false`.

use farmwatch_core::escalation::{MailError, MailMessage, Mailer};
use tracing::info;

pub struct LogMailer {
    sender: String,
}

impl LogMailer {
    pub fn new(sender: impl Into<String>) -> Self {
        Self { sender: sender.into() }
    }
}

impl Mailer for LogMailer {
    fn send(&self, message: &MailMessage) -> Result<(), MailError> {
        if !message.to.contains('@') {
            return Err(MailError::InvalidAddress(message.to.clone()));
        }
        info!(
            "E-mail de {} para {} – {}\n{}",
            self.sender, message.to, message.subject, message.body
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_address_without_at() {
        let mailer = LogMailer::new("farm@farm.test");
        let message = MailMessage {
            to: "ninguém".into(),
            subject: "s".into(),
            body: "b".into(),
        };
        assert!(matches!(mailer.send(&message), Err(MailError::InvalidAddress(_))));

        let message = MailMessage {
            to: "ana@farm.test".into(),
            ..message
        };
        assert!(mailer.send(&message).is_ok());
    }
}
