//! Definição de tipos/structs do domínio.
//!
//! Leituras de sensores, configuração de sensores/relés/contatos e os
//! registros produzidos pelo detector de anomalias (avisos e notificações).

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ──────────────────────────────────────────────
// Leitura
// ──────────────────────────────────────────────

/// Valor decodificado de um frame de telemetria.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    /// Código do sensor (3 caracteres, ex: "ZGT")
    pub sensor_code: String,
    pub value: f64,
    /// Momento da captura (relógio de parede)
    pub read_ts: DateTime<Utc>,
}

impl Reading {
    pub fn new(sensor_code: impl Into<String>, value: f64) -> Self {
        Self {
            sensor_code: sensor_code.into(),
            value,
            read_ts: Utc::now(),
        }
    }

    /// Identificador do dispositivo (dois primeiros caracteres do código).
    pub fn device_code(&self) -> &str {
        self.sensor_code.get(..2).unwrap_or(&self.sensor_code)
    }

    /// Tipo de medição (terceiro caractere: T, H, B…).
    pub fn measurement_code(&self) -> Option<char> {
        self.sensor_code.chars().nth(2)
    }
}

// ──────────────────────────────────────────────
// Sensor
// ──────────────────────────────────────────────

/// Configuração de um sensor, fornecida pelo store de configuração.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SensorConfig {
    pub id: u32,
    pub sensor_code: String,
    pub description: String,
    pub unit: String,
    /// Limites físicos do sensor
    pub min_possible_value: f64,
    pub max_possible_value: f64,
    /// Limites de aviso (ausente = sem limite daquele lado)
    pub min_warning_value: Option<f64>,
    pub max_warning_value: Option<f64>,
    /// Tamanho da janela (N)
    pub observable_measurements: usize,
    /// Leituras fora do limite necessárias para alarmar (K ≤ N)
    pub observable_alarming_measurements: usize,
    /// Cooldown entre alarmes do mesmo sensor
    pub warning_wait_minutes: Option<u32>,
    pub enable_warnings: bool,
    /// Intervalo de emissão do sensor (segundos)
    pub emit_every: u64,
    pub save_to_archive: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            id: 0,
            sensor_code: String::new(),
            description: String::new(),
            unit: String::new(),
            min_possible_value: 0.0,
            max_possible_value: 100.0,
            min_warning_value: None,
            max_warning_value: None,
            observable_measurements: 3,
            observable_alarming_measurements: 2,
            warning_wait_minutes: Some(10),
            enable_warnings: true,
            emit_every: 60,
            save_to_archive: true,
        }
    }
}

impl SensorConfig {
    pub fn is_value_too_low(&self, value: f64) -> bool {
        self.min_warning_value.is_some_and(|min| value < min)
    }

    pub fn is_value_too_high(&self, value: f64) -> bool {
        self.max_warning_value.is_some_and(|max| value > max)
    }

    pub fn is_value_out_of_bounds(&self, value: f64) -> bool {
        self.is_value_too_low(value) || self.is_value_too_high(value)
    }

    /// Definição da série temporal deste sensor dentro de `dir`.
    pub fn series_definition(&self, dir: &Path) -> SeriesDefinition {
        SeriesDefinition {
            name: self.sensor_code.clone(),
            step_secs: self.emit_every,
            path: dir.join(format!("{}-{}.csv", self.sensor_code, self.emit_every)),
            min: self.min_possible_value,
            max: self.max_possible_value,
        }
    }
}

/// Série do arquivo histórico (nome, passo, caminho e limites físicos).
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesDefinition {
    pub name: String,
    pub step_secs: u64,
    pub path: PathBuf,
    pub min: f64,
    pub max: f64,
}

// ──────────────────────────────────────────────
// Relés
// ──────────────────────────────────────────────

/// Intenção/resultado de acionamento de um relé.
///
/// `Pending*` são intenções enviadas pela UI; `On`/`Off` são estados
/// confirmados pela placa; `Error` indica falha do driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayCommandState {
    Off,
    PendingOff,
    On,
    PendingOn,
    Error,
}

impl RelayCommandState {
    pub fn is_pending(self) -> bool {
        matches!(self, Self::PendingOff | Self::PendingOn)
    }
}

/// Estado de um relé com pino e instante da mudança.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayState {
    pub pin: u32,
    pub state: RelayCommandState,
    pub changed_ts: DateTime<Utc>,
}

impl RelayState {
    pub fn new(pin: u32, state: RelayCommandState) -> Self {
        Self {
            pin,
            state,
            changed_ts: Utc::now(),
        }
    }
}

/// Configuração de um relé da placa.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RelayConfig {
    pub id: u32,
    pub description: String,
    pub switch_on_text: String,
    pub switch_off_text: String,
    /// Pino na placa (ausente = relé não utilizável)
    pub pin: Option<u32>,
}

// ──────────────────────────────────────────────
// Contatos
// ──────────────────────────────────────────────

/// Destinatário das escalações.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Contact {
    pub id: u32,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub enable_sms_warnings: bool,
    pub enable_email_warnings: bool,
    pub enable_phone_call_warnings: bool,
    pub last_phone_call_ts: Option<DateTime<Utc>>,
    /// Cooldown entre chamadas para este contato
    pub call_wait_minutes: Option<u32>,
}

impl Default for Contact {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            phone: None,
            email: None,
            enable_sms_warnings: false,
            enable_email_warnings: false,
            enable_phone_call_warnings: false,
            last_phone_call_ts: None,
            call_wait_minutes: Some(20),
        }
    }
}

impl Contact {
    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref().filter(|p| !p.trim().is_empty())
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().filter(|e| !e.trim().is_empty())
    }

    /// Próximo instante em que uma chamada é permitida.
    pub fn next_available_phone_call(&self) -> Option<DateTime<Utc>> {
        match (self.last_phone_call_ts, self.call_wait_minutes) {
            (Some(last), Some(wait)) => Some(last + Duration::minutes(i64::from(wait))),
            _ => None,
        }
    }

    /// `true` se o contato está fora do cooldown de chamadas em `now`.
    pub fn is_call_allowed_at(&self, now: DateTime<Utc>) -> bool {
        self.next_available_phone_call()
            .is_none_or(|next| now >= next)
    }
}

// ──────────────────────────────────────────────
// Avisos e notificações
// ──────────────────────────────────────────────

/// Lado do limite violado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreachSide {
    Low,
    High,
}

/// Aviso produzido por um episódio de alarme (um por lado violado).
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub side: BreachSide,
    pub limit: f64,
    /// Extremo violado (mínimo dos baixos ou máximo dos altos)
    pub value: f64,
    pub created_ts: DateTime<Utc>,
    pub sensor: SensorConfig,
    /// Leituras da janela fora do limite neste lado
    pub alarming_readings: Vec<Reading>,
}

/// Notificação persistida e enviada aos contatos.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: u64,
    pub text: String,
    pub subject: String,
    pub created_ts: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reading_splits_device_and_measurement_codes() {
        let r = Reading::new("ABT", 152.123);
        assert_eq!(r.device_code(), "AB");
        assert_eq!(r.measurement_code(), Some('T'));
    }

    #[test]
    fn unset_thresholds_never_breach() {
        let sensor = SensorConfig::default();
        assert!(!sensor.is_value_out_of_bounds(-1e9));
        assert!(!sensor.is_value_out_of_bounds(1e9));
    }

    #[test]
    fn thresholds_are_strict() {
        let sensor = SensorConfig {
            min_warning_value: Some(10.0),
            max_warning_value: Some(20.0),
            ..Default::default()
        };
        assert!(!sensor.is_value_too_low(10.0));
        assert!(sensor.is_value_too_low(9.99));
        assert!(!sensor.is_value_too_high(20.0));
        assert!(sensor.is_value_too_high(20.01));
    }

    #[test]
    fn series_definition_uses_code_and_step() {
        let sensor = SensorConfig {
            sensor_code: "ZGT".into(),
            emit_every: 30,
            min_possible_value: -20.0,
            max_possible_value: 60.0,
            ..Default::default()
        };
        let def = sensor.series_definition(Path::new("/var/lib/farmwatch"));
        assert_eq!(def.name, "ZGT");
        assert_eq!(def.step_secs, 30);
        assert_eq!(def.path, PathBuf::from("/var/lib/farmwatch/ZGT-30.csv"));
        assert_eq!((def.min, def.max), (-20.0, 60.0));
    }

    #[test]
    fn call_cooldown() {
        let now = Utc::now();
        let mut contact = Contact {
            last_phone_call_ts: Some(now - Duration::minutes(5)),
            call_wait_minutes: Some(20),
            ..Default::default()
        };
        assert!(!contact.is_call_allowed_at(now));
        assert!(contact.is_call_allowed_at(now + Duration::minutes(15)));

        contact.call_wait_minutes = None;
        assert!(contact.is_call_allowed_at(now));
        assert_eq!(contact.next_available_phone_call(), None);
    }

    #[test]
    fn blank_phone_is_absent() {
        let contact = Contact {
            phone: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(contact.phone(), None);
    }
}
