//! Pipeline principal: leitura → janela → escalação → arquivo → UI, e o
//! tratamento dos comandos da UI.

use crate::alerts::WindowRegistry;
use crate::archive::SeriesArchive;
use crate::callcenter::{CallDispatcher, CallObserver, SmsGateway, Telephony};
use crate::config::AppConfig;
use crate::escalation::{Escalator, Mailer};
use crate::events::{ContactView, EventSink, SensorReading, SensorSnapshot, Snapshot, UiCommand, UiEvent};
use crate::listener::{self, RadioLink, SyntheticValues, TelemetryMode};
use crate::relay::{RelayDriver, RelayTransport};
use crate::store::{SiteStore, StoreError};
use crate::supervisor::{Supervisor, WorkerSpec};
use crate::types::{Reading, RelayCommandState, RelayState};
use chrono::{Duration as ChronoDuration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Notificações enviadas no snapshot inicial.
const SNAPSHOT_NOTIFICATIONS: usize = 6;

/// Espera antes de consultar os relés após o snapshot.
const RELAY_REFRESH_DELAY: Duration = Duration::from_secs(1);

/// Implementações concretas do hardware e dos serviços externos.
pub struct Collaborators {
    /// Rádio físico; `None` liga os sensores simulados
    pub radio: Option<Arc<dyn RadioLink>>,
    pub relay_transport: Box<dyn RelayTransport>,
    pub telephony: Arc<dyn Telephony>,
    pub sms: Arc<dyn SmsGateway>,
    pub mailer: Arc<dyn Mailer>,
    pub archive: Arc<dyn SeriesArchive>,
}

/// Origem das leituras, escolhida no boot.
enum Telemetry {
    Radio(Arc<dyn RadioLink>),
    Simulated(Arc<SyntheticValues>),
}

/// Eventos de chamada para a UI, com o contato chamado atualizado.
struct CallEvents {
    events: EventSink,
    store: Arc<SiteStore>,
}

impl CallEvents {
    fn emit_contacts(&self, phone: &str) {
        for contact in self.store.contacts().into_iter().filter(|c| c.phone() == Some(phone)) {
            self.events.emit(UiEvent::ContactUpdate { contact: contact.into() });
        }
    }
}

impl CallObserver for CallEvents {
    fn call_started(&self, phone: &str) {
        self.events.emit(UiEvent::CallInProgress {
            phone: phone.to_string(),
        });
        self.emit_contacts(phone);
    }

    fn call_finished(&self, phone: &str) {
        self.events.emit(UiEvent::CallEnded {
            phone: phone.to_string(),
        });
        self.emit_contacts(phone);
    }
}

pub struct Controller {
    config: AppConfig,
    supervisor: Supervisor,
    store: Arc<SiteStore>,
    windows: WindowRegistry,
    escalator: Escalator,
    relays: RelayDriver,
    archive: Arc<dyn SeriesArchive>,
    events: EventSink,
    telemetry: Telemetry,
    history_dir: PathBuf,
}

impl Controller {
    pub fn new(config: AppConfig, supervisor: Supervisor, collaborators: Collaborators, events: EventSink) -> Self {
        let store = Arc::new(SiteStore::from_config(&config));
        let calls = CallDispatcher::new(
            supervisor.clone(),
            collaborators.telephony,
            collaborators.sms,
            Arc::new(CallEvents {
                events: events.clone(),
                store: Arc::clone(&store),
            }),
            &config.calls,
            &config.sms,
        );
        let escalator = Escalator::new(
            Arc::clone(&store),
            calls,
            collaborators.mailer,
            supervisor.clone(),
            &config.mail,
        );
        let relays = RelayDriver::new(collaborators.relay_transport, supervisor.clone(), &config.relay_board);
        let telemetry = match collaborators.radio {
            Some(link) => Telemetry::Radio(link),
            None => Telemetry::Simulated(Arc::new(SyntheticValues::new())),
        };

        Self {
            history_dir: config.history.dir.clone(),
            config,
            supervisor,
            store,
            windows: WindowRegistry::new(),
            escalator,
            relays,
            archive: collaborators.archive,
            events,
            telemetry,
        }
    }

    pub fn store(&self) -> &Arc<SiteStore> {
        &self.store
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Sobe o monitor de reinício e o worker de escuta.
    pub fn start(self: &Arc<Self>) {
        self.supervisor.start_monitor();

        let (mode, label) = match &self.telemetry {
            Telemetry::Radio(link) => (TelemetryMode::Radio(Arc::clone(link)), "rádio"),
            Telemetry::Simulated(values) => (TelemetryMode::Simulated(values.clone()), "simulada"),
        };
        info!("Escuta de telemetria iniciada ({label})");

        let controller = Arc::clone(self);
        listener::start(
            &self.supervisor,
            mode,
            self.config.radio.clone(),
            Arc::clone(&self.store),
            Arc::new(move |reading| {
                if let Err(e) = controller.process_reading(reading) {
                    debug!("Leitura descartada: {e}");
                }
            }),
        );
    }

    // ──────────────────────────────────────────────
    // Leituras
    // ──────────────────────────────────────────────

    /// Processa uma leitura decodificada e emite `sensor_update`.
    pub fn process_reading(&self, reading: Reading) -> Result<SensorReading, StoreError> {
        let sensor = self.store.sensor_by_code(&reading.sensor_code)?;
        debug!("Leitura {} = {}", reading.sensor_code, reading.value);

        let warnings = self.windows.update_and_evaluate(&sensor, reading.clone());

        let mut has_notification = false;
        if !warnings.is_empty() {
            if sensor.enable_warnings {
                let escalation = self.escalator.dispatch(&warnings);
                self.events.emit(UiEvent::NotificationUpdate {
                    notification: escalation.notification,
                });
                for contact in escalation.called {
                    self.events.emit(UiEvent::ContactUpdate { contact: contact.into() });
                }
                has_notification = true;
            } else {
                info!("Avisos desativados para {}, alarme ignorado", sensor.sensor_code);
            }
        }

        if sensor.save_to_archive {
            let series = sensor.series_definition(&self.history_dir);
            if let Err(e) = self.archive.add(&reading, &series) {
                error!("Falha ao arquivar leitura de {}: {e}", sensor.sensor_code);
            }
        }

        let update = SensorReading {
            sensor_id: sensor.id,
            has_warning: sensor.is_value_out_of_bounds(reading.value),
            sensor_code: reading.sensor_code,
            value: reading.value,
            read_ts: reading.read_ts,
            has_notification,
        };
        self.events.emit(UiEvent::SensorUpdate(update.clone()));
        Ok(update)
    }

    // ──────────────────────────────────────────────
    // Comandos
    // ──────────────────────────────────────────────

    /// Executa um comando da UI. Referências inexistentes retornam erro
    /// sem alterar nada.
    pub fn handle_command(&self, command: UiCommand) -> Result<(), StoreError> {
        match command {
            UiCommand::RelaySwitch { id, state } => {
                let relay = self.store.relay(id)?;
                let pin = relay.pin.unwrap_or_default();
                if !state.is_pending() {
                    warn!("Relé {id}: estado pedido {state:?} não é pendente, comando ignorado");
                    self.events.emit(UiEvent::RelaySwitch {
                        relay_id: id,
                        state: RelayState::new(pin, RelayCommandState::Error),
                    });
                    return Ok(());
                }
                self.events.emit(UiEvent::RelaySwitch {
                    relay_id: id,
                    state: RelayState::new(pin, state),
                });
                let events = self.events.clone();
                self.relays.switch(&relay, state, move |relay_id, state| {
                    events.emit(UiEvent::RelaySwitch { relay_id, state });
                });
            }
            UiCommand::RelayRefresh { id } => {
                let relay = self.store.relay(id)?;
                self.refresh_relay(relay.id, relay.pin);
            }
            UiCommand::ChangeWarningValues {
                id,
                min_warning_value,
                max_warning_value,
                enable_warnings,
                observable_measurements,
                observable_alarming_measurements,
                warning_wait_minutes,
            } => {
                let sensor = self.store.update_sensor(id, |s| {
                    s.min_warning_value = min_warning_value;
                    s.max_warning_value = max_warning_value;
                    if let Some(v) = enable_warnings {
                        s.enable_warnings = v;
                    }
                    if let Some(v) = observable_measurements {
                        s.observable_measurements = v.max(1);
                    }
                    if let Some(v) = observable_alarming_measurements {
                        s.observable_alarming_measurements = v;
                    }
                    if warning_wait_minutes.is_some() {
                        s.warning_wait_minutes = warning_wait_minutes;
                    }
                })?;
                info!("Limites de aviso de {} alterados", sensor.sensor_code);
                self.events.emit(UiEvent::SensorWarningValues { sensor });
            }
            UiCommand::ContactUpdate {
                id,
                name,
                phone,
                email,
                enable_sms_warnings,
                enable_email_warnings,
                enable_phone_call_warnings,
                call_wait_minutes,
            } => {
                let contact = self.store.update_contact(id, |c| {
                    if let Some(v) = name {
                        c.name = v;
                    }
                    if phone.is_some() {
                        c.phone = phone;
                    }
                    if email.is_some() {
                        c.email = email;
                    }
                    if let Some(v) = enable_sms_warnings {
                        c.enable_sms_warnings = v;
                    }
                    if let Some(v) = enable_email_warnings {
                        c.enable_email_warnings = v;
                    }
                    if let Some(v) = enable_phone_call_warnings {
                        c.enable_phone_call_warnings = v;
                    }
                    if call_wait_minutes.is_some() {
                        c.call_wait_minutes = call_wait_minutes;
                    }
                })?;
                self.events.emit(UiEvent::ContactUpdate { contact: contact.into() });
            }
            UiCommand::CancelCall { id } => {
                let contact = self.store.contact(id)?;
                match contact.phone() {
                    Some(phone) if self.escalator.calls().cancel(phone) => {
                        info!("Cancelamento solicitado para a chamada de {}", contact.name);
                    }
                    _ => info!("Nenhuma chamada em curso para {}", contact.name),
                }
            }
            UiCommand::ApplySimulatedValue { sensor_code, value } => match &self.telemetry {
                Telemetry::Simulated(values) => {
                    info!("Valor simulado de {sensor_code}: {value:?}");
                    values.set_override(&sensor_code, value);
                }
                Telemetry::Radio(_) => warn!("Valor simulado ignorado, rádio físico em uso"),
            },
            UiCommand::RequestSnapshot => {
                self.events.emit(UiEvent::InitialData(self.initial_snapshot()));
                self.schedule_relay_refresh();
            }
        }
        Ok(())
    }

    fn refresh_relay(&self, relay_id: u32, pin: Option<u32>) {
        let events = self.events.clone();
        self.relays.get_state(relay_id, pin, move |relay_id, state| {
            events.emit(UiEvent::RelayUpdate { relay_id, state });
        });
    }

    /// Consulta o estado de todos os relés depois de um intervalo curto.
    fn schedule_relay_refresh(&self) {
        let relays = self.store.relays();
        let driver = self.relays.clone();
        let events = self.events.clone();
        self.supervisor.start(
            WorkerSpec::new("Refresh relay states", move |ctx| {
                std::thread::sleep(RELAY_REFRESH_DELAY);
                for relay in &relays {
                    if ctx.is_cancelled() {
                        break;
                    }
                    let events = events.clone();
                    driver.get_state(relay.id, relay.pin, move |relay_id, state| {
                        events.emit(UiEvent::RelayUpdate { relay_id, state });
                    });
                }
                Ok(())
            })
            .exclusive(),
        );
    }

    // ──────────────────────────────────────────────
    // Snapshot
    // ──────────────────────────────────────────────

    /// Estado completo para uma UI recém-conectada.
    pub fn initial_snapshot(&self) -> Snapshot {
        let since = Utc::now() - ChronoDuration::days(1);
        let sensors = self
            .store
            .sensors()
            .into_iter()
            .map(|sensor| {
                let series = sensor.series_definition(&self.history_dir);
                let last_reading = self.archive.last(&series).unwrap_or_else(|e| {
                    warn!("Histórico de {} indisponível: {e}", sensor.sensor_code);
                    None
                });
                let history = self.archive.history(&series, since).unwrap_or_else(|e| {
                    warn!("Histórico de {} indisponível: {e}", sensor.sensor_code);
                    Vec::new()
                });
                SensorSnapshot {
                    sensor,
                    last_reading,
                    history,
                }
            })
            .collect();

        Snapshot {
            sensors,
            relays: self.store.relays(),
            notifications: self.store.recent_notifications(SNAPSHOT_NOTIFICATIONS),
            contacts: self.store.contacts().into_iter().map(ContactView::from).collect(),
            calls_in_progress: self.escalator.calls().calls_in_progress(),
        }
    }
}
