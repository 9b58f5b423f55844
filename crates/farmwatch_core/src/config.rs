//! Configuração unificada via TOML.
//!
//! Um único `config.toml` define portas seriais, canais de alerta,
//! supervisor e as entidades (sensores, contatos, relés).

use crate::protocol::CODE_LEN;
use crate::types::{Contact, RelayConfig, SensorConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Erros ao salvar configuração.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Erro de serialização: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Erro de escrita em {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Rádio que recebe os frames de telemetria.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// `false` = sensores simulados
    pub listen: bool,
    pub port: String,
    pub baud: u32,
    /// Pausa entre leituras do buffer (segundos)
    pub wait_secs: f64,
    /// Pausa após abrir a porta, antes de descartar o buffer
    pub settle_ms: u64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            listen: false,
            port: "/dev/ttyAMA0".into(),
            baud: 115_200,
            wait_secs: 1.0,
            settle_ms: 200,
        }
    }
}

impl RadioConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_secs_f64(self.wait_secs)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

/// Placa de relés e tempos da transação serial.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayBoardConfig {
    /// `false` = respostas simuladas
    pub enabled: bool,
    pub port: String,
    pub baud: u32,
    /// Timeout de leitura/escrita
    pub io_timeout_ms: u64,
    /// Pausa após abrir a porta
    pub settle_ms: u64,
    /// Pausa entre enviar o comando e ler a resposta
    pub response_wait_ms: u64,
    /// Pausa antes de repetir após resposta inválida
    pub retry_pause_ms: u64,
    pub max_retries: u32,
    /// Latência da placa simulada
    pub simulated_latency_ms: u64,
}

impl Default for RelayBoardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: "/dev/ttyACM0".into(),
            baud: 9600,
            io_timeout_ms: 2000,
            settle_ms: 200,
            response_wait_ms: 300,
            retry_pause_ms: 300,
            max_retries: 5,
            simulated_latency_ms: 500,
        }
    }
}

/// Supervisor de workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub restart_failed_workers: bool,
    /// Intervalo entre reinícios consecutivos
    pub restart_pacing_secs: f64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_failed_workers: true,
            restart_pacing_secs: 5.0,
        }
    }
}

impl SupervisorConfig {
    pub fn restart_pacing(&self) -> Duration {
        Duration::from_secs_f64(self.restart_pacing_secs)
    }
}

/// Chamadas telefônicas.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    pub make_calls: bool,
    pub max_attempts: u32,
    pub poll_interval_secs: f64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            make_calls: false,
            max_attempts: 30,
            poll_interval_secs: 3.0,
        }
    }
}

impl CallConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_interval_secs)
    }
}

/// SMS.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SmsConfig {
    pub send_sms: bool,
}

/// E-mail.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// `true` = e-mails só vão para o log
    pub suppress_send: bool,
    pub subject_prefix: String,
    pub sender: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            suppress_send: true,
            subject_prefix: "[FarmWatch]".into(),
            sender: String::new(),
        }
    }
}

/// Credenciais da Twilio. SMS pode usar uma segunda conta.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TwilioConfig {
    pub api_base: String,
    pub account_sid: String,
    pub auth_token: String,
    pub from_phone: String,
    /// TwiML tocado na chamada; o conteúdo não importa, só o toque
    pub call_twiml_url: String,
    pub sms_account_sid: String,
    pub sms_auth_token: String,
    pub sms_from_phone: String,
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.twilio.com/2010-04-01".into(),
            account_sid: String::new(),
            auth_token: String::new(),
            from_phone: String::new(),
            call_twiml_url: "http://demo.twilio.com/docs/voice.xml".into(),
            sms_account_sid: String::new(),
            sms_auth_token: String::new(),
            sms_from_phone: String::new(),
        }
    }
}

/// Histórico das leituras.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Séries em CSV no disco (senão só memória)
    pub csv_enabled: bool,
    pub dir: PathBuf,
    /// Pontos mantidos por série (memória ou CSV)
    pub max_points: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            csv_enabled: false,
            dir: PathBuf::from("db"),
            max_points: 2880,
        }
    }
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub radio: RadioConfig,
    pub relay_board: RelayBoardConfig,
    pub supervisor: SupervisorConfig,
    pub calls: CallConfig,
    pub sms: SmsConfig,
    pub mail: MailConfig,
    pub twilio: TwilioConfig,
    pub history: HistoryConfig,
    pub sensors: Vec<SensorConfig>,
    pub contacts: Vec<Contact>,
    pub relays: Vec<RelayConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            radio: RadioConfig::default(),
            relay_board: RelayBoardConfig::default(),
            supervisor: SupervisorConfig::default(),
            calls: CallConfig::default(),
            sms: SmsConfig::default(),
            mail: MailConfig::default(),
            twilio: TwilioConfig::default(),
            history: HistoryConfig::default(),
            sensors: vec![
                SensorConfig {
                    id: 1,
                    sensor_code: "ZGT".into(),
                    description: "Estufa temperatura".into(),
                    unit: "°C".into(),
                    min_possible_value: -20.0,
                    max_possible_value: 50.0,
                    min_warning_value: Some(2.0),
                    max_warning_value: Some(35.0),
                    ..Default::default()
                },
                SensorConfig {
                    id: 2,
                    sensor_code: "ZGH".into(),
                    description: "Estufa umidade".into(),
                    unit: "%".into(),
                    min_possible_value: 0.0,
                    max_possible_value: 100.0,
                    max_warning_value: Some(95.0),
                    ..Default::default()
                },
            ],
            contacts: Vec::new(),
            relays: vec![RelayConfig {
                id: 1,
                description: "Aquecimento".into(),
                switch_on_text: "Ligar".into(),
                switch_off_text: "Desligar".into(),
                pin: Some(13),
            }],
        }
    }
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.radio.listen && (self.radio.port.is_empty() || self.radio.baud == 0) {
            errors.push("Porta/baud do rádio não configurados".into());
        }
        if self.radio.wait_secs <= 0.0 {
            errors.push(format!("Intervalo do rádio inválido: {}", self.radio.wait_secs));
        }
        if self.relay_board.enabled && (self.relay_board.port.is_empty() || self.relay_board.baud == 0) {
            errors.push("Porta/baud da placa de relés não configurados".into());
        }
        if self.calls.max_attempts == 0 {
            errors.push("calls.max_attempts deve ser > 0".into());
        }
        if self.calls.poll_interval_secs <= 0.0 {
            errors.push(format!(
                "Intervalo de consulta de chamadas inválido: {}",
                self.calls.poll_interval_secs
            ));
        }
        if self.history.max_points == 0 {
            errors.push("history.max_points deve ser > 0".into());
        }

        let mut codes = HashSet::new();
        for sensor in &self.sensors {
            let code = &sensor.sensor_code;
            if code.len() != CODE_LEN || !code.is_ascii() {
                errors.push(format!("Sensor {}: código {code:?} deve ter {CODE_LEN} caracteres", sensor.id));
            }
            if !codes.insert(code.as_str()) {
                errors.push(format!("Código de sensor duplicado: {code}"));
            }
            if sensor.observable_measurements == 0 {
                errors.push(format!("Sensor {code}: observable_measurements deve ser > 0"));
            }
            if sensor.observable_alarming_measurements > sensor.observable_measurements {
                errors.push(format!(
                    "Sensor {code}: observable_alarming_measurements ({}) > observable_measurements ({})",
                    sensor.observable_alarming_measurements, sensor.observable_measurements
                ));
            }
            if sensor.min_possible_value >= sensor.max_possible_value {
                errors.push(format!("Sensor {code}: limites físicos invertidos"));
            }
            if sensor.emit_every == 0 {
                errors.push(format!("Sensor {code}: emit_every deve ser > 0"));
            }
        }

        for relay in &self.relays {
            if relay.pin.is_none() {
                errors.push(format!("Relé {}: pino não definido", relay.id));
            }
        }

        errors
    }
}
