//! Eventos para a UI e comandos vindos dela.
//!
//! Ambos são JSON com a variante no campo `type`. Os eventos saem por um
//! channel limitado: se a UI não consome, os mais novos são descartados.

use crate::types::{Contact, Notification, Reading, RelayCommandState, RelayConfig, RelayState, SensorConfig};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Capacidade do channel de eventos.
pub const EVENT_BUFFER: usize = 256;

// ──────────────────────────────────────────────
// Payloads
// ──────────────────────────────────────────────

/// Leitura processada, como a UI mostra.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorReading {
    pub sensor_id: u32,
    pub sensor_code: String,
    pub value: f64,
    pub read_ts: DateTime<Utc>,
    /// Valor fora de algum limite de aviso
    pub has_warning: bool,
    /// Esta leitura gerou uma notificação
    pub has_notification: bool,
}

/// Contato com o próximo horário permitido para chamada.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContactView {
    #[serde(flatten)]
    pub contact: Contact,
    pub next_available_phone_call: Option<DateTime<Utc>>,
}

impl From<Contact> for ContactView {
    fn from(contact: Contact) -> Self {
        let next_available_phone_call = contact.next_available_phone_call();
        Self {
            contact,
            next_available_phone_call,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorSnapshot {
    pub sensor: SensorConfig,
    pub last_reading: Option<Reading>,
    pub history: Vec<Reading>,
}

/// Estado completo enviado quando a UI conecta.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub sensors: Vec<SensorSnapshot>,
    pub relays: Vec<RelayConfig>,
    pub notifications: Vec<Notification>,
    pub contacts: Vec<ContactView>,
    pub calls_in_progress: Vec<String>,
}

// ──────────────────────────────────────────────
// Eventos e comandos
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    SensorUpdate(SensorReading),
    SensorWarningValues { sensor: SensorConfig },
    /// Eco da intenção (pendente) e depois o resultado do acionamento
    RelaySwitch { relay_id: u32, state: RelayState },
    RelayUpdate { relay_id: u32, state: RelayState },
    NotificationUpdate { notification: Notification },
    ContactUpdate { contact: ContactView },
    CallInProgress { phone: String },
    CallEnded { phone: String },
    InitialData(Snapshot),
}

/// Comando da UI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiCommand {
    RelaySwitch {
        id: u32,
        state: RelayCommandState,
    },
    RelayRefresh {
        id: u32,
    },
    /// Os limites são sempre aplicados (`null` = sem limite); os demais
    /// campos só quando presentes.
    ChangeWarningValues {
        id: u32,
        min_warning_value: Option<f64>,
        max_warning_value: Option<f64>,
        #[serde(default)]
        enable_warnings: Option<bool>,
        #[serde(default)]
        observable_measurements: Option<usize>,
        #[serde(default)]
        observable_alarming_measurements: Option<usize>,
        #[serde(default)]
        warning_wait_minutes: Option<u32>,
    },
    /// Campos ausentes ficam como estão; telefone/e-mail vazio desliga o canal.
    ContactUpdate {
        id: u32,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        phone: Option<String>,
        #[serde(default)]
        email: Option<String>,
        #[serde(default)]
        enable_sms_warnings: Option<bool>,
        #[serde(default)]
        enable_email_warnings: Option<bool>,
        #[serde(default)]
        enable_phone_call_warnings: Option<bool>,
        #[serde(default)]
        call_wait_minutes: Option<u32>,
    },
    /// Cancela a chamada em curso para o contato.
    CancelCall {
        id: u32,
    },
    /// Valor fixo para o sensor simulado (`null` volta ao aleatório).
    ApplySimulatedValue {
        sensor_code: String,
        value: Option<f64>,
    },
    RequestSnapshot,
}

// ──────────────────────────────────────────────
// Sink
// ──────────────────────────────────────────────

/// Lado produtor do channel de eventos.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<UiEvent>,
}

impl EventSink {
    /// Cria o sink e o receiver consumido pela UI.
    pub fn channel() -> (Self, Receiver<UiEvent>) {
        let (tx, rx) = bounded(EVENT_BUFFER);
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: UiEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("Channel de eventos cheio, descartando evento"),
            Err(TrySendError::Disconnected(_)) => debug!("UI desconectada, descartando evento"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_from_ui_json() {
        let cmd: UiCommand = serde_json::from_str(r#"{"type":"relay_switch","id":1,"state":"pending_on"}"#).unwrap();
        assert_eq!(
            cmd,
            UiCommand::RelaySwitch {
                id: 1,
                state: RelayCommandState::PendingOn
            }
        );

        let cmd: UiCommand = serde_json::from_str(
            r#"{"type":"change_warning_values","id":2,"min_warning_value":null,"max_warning_value":30.5}"#,
        )
        .unwrap();
        assert!(matches!(
            cmd,
            UiCommand::ChangeWarningValues {
                id: 2,
                min_warning_value: None,
                max_warning_value: Some(30.5),
                enable_warnings: None,
                ..
            }
        ));

        let cmd: UiCommand =
            serde_json::from_str(r#"{"type":"contact_update","id":4,"phone":"+351900","enable_sms_warnings":true}"#)
                .unwrap();
        assert!(matches!(
            cmd,
            UiCommand::ContactUpdate {
                id: 4,
                name: None,
                phone: Some(ref p),
                email: None,
                enable_sms_warnings: Some(true),
                ..
            } if p == "+351900"
        ));

        let cmd: UiCommand = serde_json::from_str(r#"{"type":"request_snapshot"}"#).unwrap();
        assert_eq!(cmd, UiCommand::RequestSnapshot);
    }

    #[test]
    fn events_are_tagged() {
        let json = serde_json::to_value(UiEvent::CallEnded { phone: "+100".into() }).unwrap();
        assert_eq!(json["type"], "call_ended");
        assert_eq!(json["phone"], "+100");

        let contact = Contact {
            id: 3,
            last_phone_call_ts: Some(Utc::now()),
            ..Default::default()
        };
        let json = serde_json::to_value(UiEvent::ContactUpdate {
            contact: contact.into(),
        })
        .unwrap();
        assert_eq!(json["contact"]["id"], 3);
        assert!(json["contact"]["next_available_phone_call"].is_string());
    }

    #[test]
    fn full_channel_drops_events() {
        let (sink, rx) = EventSink::channel();
        for _ in 0..EVENT_BUFFER + 10 {
            sink.emit(UiEvent::CallInProgress { phone: "+100".into() });
        }
        assert_eq!(rx.len(), EVENT_BUFFER);

        drop(rx);
        sink.emit(UiEvent::CallEnded { phone: "+100".into() });
    }
}
