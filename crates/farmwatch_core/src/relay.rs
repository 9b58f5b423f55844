//! Protocolo da placa de relés (comando/resposta serial).
//!
//! ```text
//! comando:  a<pino>_<código>-     código: 0 = desligar, 1 = ligar, 2 = consultar
//! resposta: <pino>_<ON|OF>        (espaços e padding '-' no fim são tolerados)
//! ```
//!
//! Toda transação usa o barramento com exclusividade (mutex de processo).
//! Uma resposta inválida (ou nenhuma, até o timeout) é repetida como consulta de estado, até
//! `max_retries` vezes.

use crate::config::RelayBoardConfig;
use crate::supervisor::{Supervisor, WorkerSpec};
use crate::types::{RelayCommandState, RelayConfig, RelayState};
use rand::Rng;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info};

/// Código de consulta de estado.
pub const STATE_QUERY_CODE: u8 = 2;

/// Erros do driver de relés.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Erro de I/O na placa de relés: {0}")]
    Io(#[from] io::Error),

    #[error("Resposta serial inválida: {0:?}")]
    InvalidResponse(String),

    #[error("Pino do relé {0} não definido")]
    MissingPin(u32),

    #[error("Estado inválido {state:?} para o relé {relay_id}")]
    InvalidIntent {
        relay_id: u32,
        state: RelayCommandState,
    },
}

// ──────────────────────────────────────────────
// Codificação
// ──────────────────────────────────────────────

/// Comando para levar o relé ao estado pedido (`PendingOff`/`PendingOn`).
pub fn create_query(pin: u32, intent: RelayCommandState) -> Option<String> {
    let code = match intent {
        RelayCommandState::PendingOff => 0,
        RelayCommandState::PendingOn => 1,
        _ => return None,
    };
    Some(format!("a{pin}_{code}-"))
}

/// Comando de consulta de estado.
pub fn create_state_query(pin: u32) -> String {
    format!("a{pin}_{STATE_QUERY_CODE}-")
}

/// Troca o código do comando pelo de consulta, mantendo o pino.
fn as_state_query(command: &str) -> String {
    match command.find('_') {
        Some(idx) => format!("{}{STATE_QUERY_CODE}-", &command[..=idx]),
        None => command.to_string(),
    }
}

/// Decodifica a resposta da placa.
pub fn parse_response(response: &str) -> Result<RelayState, RelayError> {
    let cleaned = response.trim().trim_end_matches('-').trim_end();
    let invalid = || RelayError::InvalidResponse(response.to_string());

    let mut parts = cleaned.split('_');
    let (Some(pin), Some(state), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(invalid());
    };

    let pin: u32 = pin.parse().map_err(|_| invalid())?;
    let state = match state {
        "ON" => RelayCommandState::On,
        "OF" => RelayCommandState::Off,
        _ => return Err(invalid()),
    };
    Ok(RelayState::new(pin, state))
}

// ──────────────────────────────────────────────
// Transporte
// ──────────────────────────────────────────────

/// Uma troca comando/resposta com a placa.
///
/// A implementação física abre a porta, espera a placa, descarta o buffer
/// de entrada, escreve o comando, espera e lê uma linha.
pub trait RelayTransport: Send {
    fn transact(&mut self, command: &str) -> io::Result<String>;
}

/// Placa simulada: responde de forma determinística ao comando; a
/// consulta de estado devolve ON/OF aleatório.
#[derive(Debug, Clone)]
pub struct SimulatedRelayBoard {
    latency: Duration,
}

impl SimulatedRelayBoard {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl RelayTransport for SimulatedRelayBoard {
    fn transact(&mut self, command: &str) -> io::Result<String> {
        std::thread::sleep(self.latency);
        debug!("Consulta SIMULADA à placa de relés {command}");

        let bad = || io::Error::new(io::ErrorKind::InvalidInput, format!("comando inválido {command:?}"));
        let (pin, code) = command
            .strip_prefix('a')
            .and_then(|c| c.strip_suffix('-'))
            .and_then(|c| c.split_once('_'))
            .ok_or_else(bad)?;
        let pin: u32 = pin.parse().map_err(|_| bad())?;

        let state = match code {
            "0" => "OF",
            "1" => "ON",
            "2" if rand::thread_rng().gen_bool(0.5) => "ON",
            "2" => "OF",
            _ => return Err(bad()),
        };
        Ok(format!("{pin}_{state}"))
    }
}

// ──────────────────────────────────────────────
// Driver
// ──────────────────────────────────────────────

/// Driver da placa: serializa o barramento e executa consultas como
/// workers supervisionados.
#[derive(Clone)]
pub struct RelayDriver {
    bus: Arc<Mutex<Box<dyn RelayTransport>>>,
    supervisor: Supervisor,
    max_retries: u32,
    retry_pause: Duration,
}

impl RelayDriver {
    pub fn new(
        transport: Box<dyn RelayTransport>,
        supervisor: Supervisor,
        config: &RelayBoardConfig,
    ) -> Self {
        Self {
            bus: Arc::new(Mutex::new(transport)),
            supervisor,
            max_retries: config.max_retries,
            retry_pause: Duration::from_millis(config.retry_pause_ms),
        }
    }

    /// Executa `command` com o orçamento de repetições configurado.
    pub fn perform_query(&self, command: &str) -> Result<RelayState, RelayError> {
        self.perform_query_with(command, self.max_retries)
    }

    /// Executa `command`. Respostas inválidas e timeouts de leitura são
    /// repetidos como consulta de estado até esgotar `max_retries`; os
    /// demais erros de I/O sobem na hora.
    pub fn perform_query_with(&self, command: &str, max_retries: u32) -> Result<RelayState, RelayError> {
        let mut command = command.to_string();
        let mut retries_left = max_retries;

        loop {
            let mut bus = self.bus.lock().unwrap_or_else(PoisonError::into_inner);
            debug!("Executando consulta ao relé {command}");
            let response = match bus.transact(&command) {
                Ok(response) => response,
                // Placa muda até o timeout conta como resposta vazia
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    debug!("Timeout aguardando resposta para {command}");
                    String::new()
                }
                Err(e) => return Err(e.into()),
            };

            match parse_response(&response) {
                Ok(state) => {
                    debug!("Resultado da consulta {command} = {response:?}");
                    return Ok(state);
                }
                Err(e) => {
                    info!("Resposta {response:?} não interpretada, repetições restantes {retries_left}");
                    if retries_left == 0 {
                        return Err(e);
                    }
                    retries_left -= 1;
                    std::thread::sleep(self.retry_pause);
                    command = as_state_query(&command);
                }
            }
        }
    }

    /// Aciona o relé em um worker; `callback` recebe o estado final
    /// (ou `Error`) exatamente uma vez.
    pub fn switch<F>(&self, relay: &RelayConfig, intent: RelayCommandState, callback: F)
    where
        F: Fn(u32, RelayState) + Send + Sync + 'static,
    {
        let driver = self.clone();
        let relay = relay.clone();
        self.supervisor.start(WorkerSpec::new("Relay switch", move |_| {
            let state = driver.perform_switch(&relay, intent).unwrap_or_else(|e| {
                error!("Falha ao acionar relé {}: {e}", relay.id);
                RelayState::new(relay.pin.unwrap_or_default(), RelayCommandState::Error)
            });
            callback(relay.id, state);
            Ok(())
        }));
    }

    fn perform_switch(&self, relay: &RelayConfig, intent: RelayCommandState) -> Result<RelayState, RelayError> {
        let pin = relay.pin.ok_or(RelayError::MissingPin(relay.id))?;
        let command = create_query(pin, intent).ok_or(RelayError::InvalidIntent {
            relay_id: relay.id,
            state: intent,
        })?;
        self.perform_query(&command)
    }

    /// Consulta o estado do relé em um worker; `callback` recebe o estado
    /// (ou `Error`) exatamente uma vez.
    pub fn get_state<F>(&self, relay_id: u32, pin: Option<u32>, callback: F)
    where
        F: Fn(u32, RelayState) + Send + Sync + 'static,
    {
        let driver = self.clone();
        self.supervisor.start(WorkerSpec::new(format!("Get relay state {relay_id}"), move |_| {
            let state = pin
                .ok_or(RelayError::MissingPin(relay_id))
                .and_then(|pin| driver.perform_query(&create_state_query(pin)))
                .unwrap_or_else(|e| {
                    error!("Falha ao consultar relé {relay_id}: {e}");
                    RelayState::new(pin.unwrap_or_default(), RelayCommandState::Error)
                });
            callback(relay_id, state);
            Ok(())
        }));
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
