//! Store de configuração em memória (sensores, contatos, relés e
//! notificações recentes).
//!
//! Carregado do `config.toml` no boot; alterações feitas pela UI valem
//! até o processo reiniciar.

use crate::config::AppConfig;
use crate::types::{Contact, Notification, RelayConfig, SensorConfig};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Quantas notificações ficam guardadas.
const NOTIFICATION_HISTORY: usize = 100;

/// Entidade referenciada que não existe.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StoreError {
    #[error("Sensor não definido para o código {0:?}")]
    UnknownSensorCode(String),

    #[error("Sensor {0} não definido")]
    UnknownSensor(u32),

    #[error("Relé {0} não definido")]
    UnknownRelay(u32),

    #[error("Contato {0} não definido")]
    UnknownContact(u32),
}

#[derive(Debug, Default)]
struct StoreData {
    sensors: Vec<SensorConfig>,
    contacts: Vec<Contact>,
    relays: Vec<RelayConfig>,
    notifications: VecDeque<Notification>,
    next_notification_id: u64,
}

#[derive(Debug, Default)]
pub struct SiteStore {
    data: RwLock<StoreData>,
}

impl SiteStore {
    pub fn new(sensors: Vec<SensorConfig>, contacts: Vec<Contact>, relays: Vec<RelayConfig>) -> Self {
        Self {
            data: RwLock::new(StoreData {
                sensors,
                contacts,
                relays,
                notifications: VecDeque::new(),
                next_notification_id: 1,
            }),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.sensors.clone(),
            config.contacts.clone(),
            config.relays.clone(),
        )
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreData> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreData> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Sensores ──

    pub fn sensors(&self) -> Vec<SensorConfig> {
        self.read().sensors.clone()
    }

    pub fn sensor_by_code(&self, code: &str) -> Result<SensorConfig, StoreError> {
        self.read()
            .sensors
            .iter()
            .find(|s| s.sensor_code == code)
            .cloned()
            .ok_or_else(|| StoreError::UnknownSensorCode(code.to_string()))
    }

    pub fn update_sensor(
        &self,
        id: u32,
        change: impl FnOnce(&mut SensorConfig),
    ) -> Result<SensorConfig, StoreError> {
        let mut data = self.write();
        let sensor = data
            .sensors
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::UnknownSensor(id))?;
        change(sensor);
        Ok(sensor.clone())
    }

    // ── Relés ──

    pub fn relays(&self) -> Vec<RelayConfig> {
        self.read().relays.clone()
    }

    pub fn relay(&self, id: u32) -> Result<RelayConfig, StoreError> {
        self.read()
            .relays
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(StoreError::UnknownRelay(id))
    }

    // ── Contatos ──

    pub fn contacts(&self) -> Vec<Contact> {
        self.read().contacts.clone()
    }

    pub fn contact(&self, id: u32) -> Result<Contact, StoreError> {
        self.read()
            .contacts
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or(StoreError::UnknownContact(id))
    }

    pub fn update_contact(
        &self,
        id: u32,
        change: impl FnOnce(&mut Contact),
    ) -> Result<Contact, StoreError> {
        let mut data = self.write();
        let contact = data
            .contacts
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StoreError::UnknownContact(id))?;
        change(contact);
        Ok(contact.clone())
    }

    /// Reserva uma chamada para o contato: se estiver fora do cooldown em
    /// `now`, grava `last_phone_call_ts = now` e retorna `true`.
    pub fn claim_call_slot(&self, id: u32, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut data = self.write();
        let contact = data
            .contacts
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StoreError::UnknownContact(id))?;
        if !contact.is_call_allowed_at(now) {
            return Ok(false);
        }
        contact.last_phone_call_ts = Some(now);
        Ok(true)
    }

    // ── Notificações ──

    /// Persiste uma notificação e retorna-a com id atribuído.
    pub fn add_notification(&self, text: String, subject: String, created_ts: DateTime<Utc>) -> Notification {
        let mut data = self.write();
        let notification = Notification {
            id: data.next_notification_id,
            text,
            subject,
            created_ts,
        };
        data.next_notification_id += 1;
        data.notifications.push_front(notification.clone());
        data.notifications.truncate(NOTIFICATION_HISTORY);
        notification
    }

    /// Últimas `limit` notificações, mais recentes primeiro.
    pub fn recent_notifications(&self, limit: usize) -> Vec<Notification> {
        self.read().notifications.iter().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> SiteStore {
        let config = AppConfig {
            contacts: vec![Contact {
                id: 4,
                name: "Ana".into(),
                phone: Some("+38640111222".into()),
                call_wait_minutes: Some(20),
                ..Default::default()
            }],
            ..Default::default()
        };
        SiteStore::from_config(&config)
    }

    #[test]
    fn lookups_report_missing_entities() {
        let store = store();
        assert_eq!(store.sensor_by_code("ZGT").unwrap().id, 1);
        assert_eq!(
            store.sensor_by_code("XXX"),
            Err(StoreError::UnknownSensorCode("XXX".into()))
        );
        assert_eq!(store.relay(99), Err(StoreError::UnknownRelay(99)));
        assert_eq!(
            store.update_contact(5, |_| {}),
            Err(StoreError::UnknownContact(5))
        );
    }

    #[test]
    fn sensor_updates_are_visible() {
        let store = store();
        store
            .update_sensor(1, |s| s.observable_measurements = 5)
            .unwrap();
        assert_eq!(store.sensor_by_code("ZGT").unwrap().observable_measurements, 5);
    }

    #[test]
    fn call_slot_respects_cooldown() {
        let store = store();
        let now = Utc::now();
        assert!(store.claim_call_slot(4, now).unwrap());
        assert!(!store.claim_call_slot(4, now + Duration::minutes(19)).unwrap());
        assert!(store.claim_call_slot(4, now + Duration::minutes(20)).unwrap());
        assert_eq!(
            store.contact(4).unwrap().last_phone_call_ts,
            Some(now + Duration::minutes(20))
        );
    }

    #[test]
    fn notifications_newest_first() {
        let store = store();
        for i in 0..8 {
            store.add_notification(format!("n{i}"), "s".into(), Utc::now());
        }
        let recent = store.recent_notifications(6);
        assert_eq!(recent.len(), 6);
        assert_eq!(recent[0].text, "n7");
        assert_eq!(recent[0].id, 8);
        assert_eq!(recent[5].text, "n2");
    }
}
