//! # FarmWatch Daemon
//!
//! Escuta os sensores pelo rádio serial, aciona a placa de relés e
//! escala avisos por SMS, e-mail e chamada.
//!
//! A UI conversa pelo stdio: comandos JSON (um por linha) no stdin,
//! eventos JSON (um por linha) no stdout. O log vai para o stderr.
//!
//! ## Uso
//! ```bash
//! farmwatch_daemon                  # config.toml ao lado do executável
//! farmwatch_daemon /etc/farm.toml   # config explícito
//! ```

mod history;
mod mail;
mod serial;
mod twilio;

use crossbeam_channel::Receiver;
use farmwatch_core::archive::{MemoryArchive, SeriesArchive};
use farmwatch_core::listener::RadioLink;
use farmwatch_core::relay::{RelayTransport, SimulatedRelayBoard};
use farmwatch_core::{AppConfig, Collaborators, Controller, EventSink, Supervisor, UiCommand, UiEvent};
use history::CsvArchive;
use mail::LogMailer;
use serial::{SerialRadio, SerialRelayBoard};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use twilio::TwilioClient;

fn main() {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(io::stderr)
        .init();

    // ── Carregar config ──
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(AppConfig::default_path);
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }
    for problem in config.validate() {
        warn!("Configuração: {problem}");
    }

    // ── Colaboradores ──
    let twilio = match TwilioClient::new(&config.twilio) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Falha ao criar cliente da Twilio: {e}");
            return;
        }
    };

    let archive: Arc<dyn SeriesArchive> = if config.history.csv_enabled {
        Arc::new(CsvArchive::new(config.history.max_points))
    } else {
        Arc::new(MemoryArchive::new(config.history.max_points))
    };

    let relay_transport: Box<dyn RelayTransport> = if config.relay_board.enabled {
        Box::new(SerialRelayBoard::new(&config.relay_board))
    } else {
        Box::new(SimulatedRelayBoard::new(Duration::from_millis(
            config.relay_board.simulated_latency_ms,
        )))
    };

    let radio: Option<Arc<dyn RadioLink>> = if config.radio.listen {
        Some(Arc::new(SerialRadio::new(&config.radio)))
    } else {
        None
    };

    // ── Banner ── (stderr: o stdout é dos eventos)
    eprintln!();
    eprintln!("══════════════════════════════════════════════");
    eprintln!("   🌱 FARMWATCH – ATIVO (Rust)");
    eprintln!("══════════════════════════════════════════════");
    eprintln!(
        "  Rádio:     {}",
        if config.radio.listen { config.radio.port.as_str() } else { "SIMULADO" }
    );
    eprintln!(
        "  Relés:     {}",
        if config.relay_board.enabled { config.relay_board.port.as_str() } else { "SIMULADO" }
    );
    eprintln!("  Sensores:  {}", config.sensors.len());
    eprintln!("  Contatos:  {}", config.contacts.len());
    eprintln!(
        "  Canais:    SMS {} | e-mail {} | chamadas {}",
        on_off(config.sms.send_sms),
        on_off(!config.mail.suppress_send),
        on_off(config.calls.make_calls)
    );
    eprintln!("══════════════════════════════════════════════");
    eprintln!();

    let collaborators = Collaborators {
        radio,
        relay_transport,
        telephony: twilio.clone(),
        sms: twilio,
        mailer: Arc::new(LogMailer::new(config.mail.sender.clone())),
        archive,
    };

    let supervisor = Supervisor::new(&config.supervisor);
    let (events, event_rx) = EventSink::channel();
    let controller = Arc::new(Controller::new(config, supervisor, collaborators, events));

    // ── Eventos → stdout ──
    let writer = match std::thread::Builder::new()
        .name("event-writer".into())
        .spawn(move || write_events(event_rx))
    {
        Ok(handle) => handle,
        Err(e) => {
            error!("Falha ao criar thread de eventos: {e}");
            return;
        }
    };

    controller.start();
    if let Err(e) = controller.handle_command(UiCommand::RequestSnapshot) {
        warn!("Snapshot inicial falhou: {e}");
    }

    // ── Comandos ← stdin ──
    read_commands(&controller);

    // Sem stdin o daemon segue rodando só com os workers
    if writer.join().is_err() {
        error!("Thread de eventos terminou com panic");
    }
    controller.supervisor().shutdown();
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "ON" } else { "OFF" }
}

fn write_events(rx: Receiver<UiEvent>) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for event in rx {
        match serde_json::to_string(&event) {
            Ok(line) => {
                if writeln!(out, "{line}").and_then(|()| out.flush()).is_err() {
                    warn!("stdout fechado, eventos não serão mais escritos");
                    break;
                }
            }
            Err(e) => error!("Erro ao serializar evento: {e}"),
        }
    }
}

fn read_commands(controller: &Controller) {
    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("Erro ao ler stdin: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<UiCommand>(&line) {
            Ok(command) => {
                if let Err(e) = controller.handle_command(command) {
                    warn!("Comando abandonado: {e}");
                }
            }
            Err(e) => warn!("Comando inválido: {e}"),
        }
    }
    info!("stdin fechado, comandos da UI desativados");
}
