//! Escalação de avisos – notificação, SMS, e-mail e chamada.
//!
//! Para cada conjunto de avisos é criada uma única notificação; depois
//! cada contato recebe os canais que tem habilitados. A chamada só sai se
//! o contato estiver fora do cooldown, e a reserva do horário da chamada
//! é atômica no store.

use crate::callcenter::CallDispatcher;
use crate::config::MailConfig;
use crate::store::SiteStore;
use crate::supervisor::{Supervisor, WorkerSpec};
use crate::types::{Contact, Notification, Warning};
use chrono::{DateTime, Local, Utc};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};

const TEXT_TIMESTAMP_FORMAT: &str = "%d.%m.%Y %H:%M:%S <%z>";
const SUBJECT_TIMESTAMP_FORMAT: &str = "%d.%m.%Y:%H:%M";

// ──────────────────────────────────────────────
// Texto da notificação
// ──────────────────────────────────────────────

fn limit_label(warning: &Warning) -> &'static str {
    if warning.limit < warning.value { "MAX" } else { "MIN" }
}

/// Texto curto (cabe em um SMS para poucos avisos).
pub fn notification_text(warnings: &[Warning]) -> String {
    let mut text = String::from("ALARM! ");
    for w in warnings {
        let _ = write!(
            text,
            "{}@{} {:.2}, {}: {:.2}; ",
            w.sensor.description,
            w.created_ts.with_timezone(&Local).format(TEXT_TIMESTAMP_FORMAT),
            w.value,
            limit_label(w),
            w.limit
        );
    }
    text
}

pub fn notification_subject(created_ts: DateTime<Utc>) -> String {
    format!(
        "Notification @ {}",
        created_ts.with_timezone(&Local).format(SUBJECT_TIMESTAMP_FORMAT)
    )
}

/// Corpo do e-mail em texto puro.
pub fn mail_body(contact: &Contact, notification: &Notification, warnings: &[Warning]) -> String {
    let mut body = format!("Olá {},\n\n{}\n\n", contact.name, notification.text);
    for w in warnings {
        let _ = writeln!(
            body,
            "- {} ({}): {:.2} {} ({} {:.2}), {} leituras fora do limite",
            w.sensor.description,
            w.sensor.sensor_code,
            w.value,
            w.sensor.unit,
            limit_label(w),
            w.limit,
            w.alarming_readings.len()
        );
    }
    body
}

// ──────────────────────────────────────────────
// E-mail
// ──────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Endereço inválido: {0}")]
    InvalidAddress(String),

    #[error("Falha no envio: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

pub trait Mailer: Send + Sync {
    fn send(&self, message: &MailMessage) -> Result<(), MailError>;
}

// ──────────────────────────────────────────────
// Escalador
// ──────────────────────────────────────────────

/// Resultado de uma escalação.
#[derive(Debug, Clone)]
pub struct Escalation {
    pub notification: Notification,
    /// Contatos cuja chamada foi reservada (com `last_phone_call_ts` novo)
    pub called: Vec<Contact>,
}

pub struct Escalator {
    store: Arc<SiteStore>,
    calls: CallDispatcher,
    mailer: Arc<dyn Mailer>,
    supervisor: Supervisor,
    mail: MailConfig,
}

impl Escalator {
    pub fn new(
        store: Arc<SiteStore>,
        calls: CallDispatcher,
        mailer: Arc<dyn Mailer>,
        supervisor: Supervisor,
        mail: &MailConfig,
    ) -> Self {
        Self {
            store,
            calls,
            mailer,
            supervisor,
            mail: mail.clone(),
        }
    }

    pub fn calls(&self) -> &CallDispatcher {
        &self.calls
    }

    pub fn dispatch(&self, warnings: &[Warning]) -> Escalation {
        self.dispatch_at(warnings, Utc::now())
    }

    /// Cria a notificação e dispara os canais de cada contato.
    pub fn dispatch_at(&self, warnings: &[Warning], now: DateTime<Utc>) -> Escalation {
        let notification =
            self.store
                .add_notification(notification_text(warnings), notification_subject(now), now);
        info!("Notificação {} criada: {}", notification.id, notification.text);

        let mut called = Vec::new();
        for contact in self.store.contacts() {
            if contact.enable_sms_warnings {
                if let Some(phone) = contact.phone() {
                    self.calls.send_sms(phone, &notification.text);
                }
            }

            if contact.enable_email_warnings {
                if let Some(email) = contact.email() {
                    self.send_email(email, &notification, mail_body(&contact, &notification, warnings));
                }
            }

            if contact.enable_phone_call_warnings {
                if let Some(phone) = contact.phone() {
                    match self.store.claim_call_slot(contact.id, now) {
                        Ok(true) => {
                            self.calls.make_call(phone);
                            if let Ok(updated) = self.store.contact(contact.id) {
                                called.push(updated);
                            }
                        }
                        Ok(false) => info!(
                            "Contato {} em cooldown de chamadas até {:?}",
                            contact.name,
                            contact.next_available_phone_call()
                        ),
                        Err(e) => warn!("{e}"),
                    }
                }
            }
        }

        Escalation { notification, called }
    }

    fn send_email(&self, to: &str, notification: &Notification, body: String) {
        let message = MailMessage {
            to: to.to_string(),
            subject: format!("{} {}", self.mail.subject_prefix, notification.subject),
            body,
        };
        if self.mail.suppress_send {
            info!("Envio de e-mail suprimido para {} ({})", message.to, message.subject);
            return;
        }

        let mailer = Arc::clone(&self.mailer);
        let name = format!("Sending e-mail to {} ({})", message.to, message.subject);
        self.supervisor.start(WorkerSpec::new(name, move |_| {
            mailer.send(&message)?;
            info!("E-mail enviado para {}", message.to);
            Ok(())
        }));
    }
}
