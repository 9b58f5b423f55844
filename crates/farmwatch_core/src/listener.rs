//! Escuta de telemetria – rádio real ou sensores simulados.
//!
//! O modo é escolhido no boot: [`TelemetryMode::Radio`] lê frames de uma
//! porta serial; [`TelemetryMode::Simulated`] gera um valor por sensor a
//! partir de uma [`ValueSource`] e passa pelo mesmo encode/decode.

use crate::config::RadioConfig;
use crate::protocol::{decode_frame, encode_frame};
use crate::store::SiteStore;
use crate::supervisor::{Supervisor, WorkResult, WorkerContext, WorkerSpec};
use crate::types::{Reading, SensorConfig};
use rand::Rng;
use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Nome do worker de escuta.
pub const LISTENER_WORKER_NAME: &str = "Serial watch";

pub type ReadingCallback = Arc<dyn Fn(Reading) + Send + Sync>;

// ──────────────────────────────────────────────
// Rádio
// ──────────────────────────────────────────────

/// Porta aberta do rádio.
pub trait RadioPort: Read + Send {
    /// Bytes já disponíveis para leitura.
    fn bytes_to_read(&mut self) -> io::Result<usize>;
    /// Descarta o buffer de entrada.
    fn clear_input(&mut self) -> io::Result<()>;
}

/// Abre a porta do rádio (uma vez por execução do worker).
pub trait RadioLink: Send + Sync {
    fn open(&self) -> io::Result<Box<dyn RadioPort>>;
    fn describe(&self) -> String;
}

/// Decodifica todos os bytes disponíveis; retorna quantas leituras saíram.
///
/// Um frame cortado no fim da rajada estoura o timeout de leitura da
/// porta; ele é descartado e o próximo ciclo ressincroniza pelo marker.
pub fn drain_port(port: &mut dyn RadioPort, on_reading: &dyn Fn(Reading)) -> io::Result<usize> {
    let mut count = 0;
    while port.bytes_to_read()? > 0 {
        match decode_frame(port) {
            Ok(Some(reading)) => {
                on_reading(reading);
                count += 1;
            }
            Ok(None) => {}
            Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                trace!("Frame incompleto descartado");
                break;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(count)
}

/// Loop de escuta: espera a porta assentar, descarta bytes antigos e
/// drena o buffer a cada `wait_secs`. Só retorna com erro de I/O ou
/// cancelamento.
pub fn listen_radio(
    port: &mut dyn RadioPort,
    config: &RadioConfig,
    ctx: &WorkerContext,
    on_reading: &dyn Fn(Reading),
) -> io::Result<()> {
    std::thread::sleep(config.settle());
    port.clear_input()?;

    while !ctx.is_cancelled() {
        debug!("Início do ciclo de leitura");
        drain_port(port, on_reading)?;
        debug!("Fim do ciclo de leitura");
        std::thread::sleep(config.wait());
    }
    Ok(())
}

// ──────────────────────────────────────────────
// Simulação
// ──────────────────────────────────────────────

/// Fonte de valores para sensores simulados.
pub trait ValueSource: Send + Sync {
    fn next_value(&self, sensor: &SensorConfig) -> f64;
}

/// Valores aleatórios dentro dos limites físicos, com valores fixos
/// injetáveis por código de sensor.
#[derive(Debug, Default)]
pub struct SyntheticValues {
    overrides: RwLock<HashMap<String, f64>>,
}

impl SyntheticValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_override(&self, sensor_code: &str, value: Option<f64>) {
        let mut overrides = self.overrides.write().unwrap_or_else(PoisonError::into_inner);
        match value {
            Some(v) => overrides.insert(sensor_code.to_string(), v),
            None => overrides.remove(sensor_code),
        };
    }
}

impl ValueSource for SyntheticValues {
    fn next_value(&self, sensor: &SensorConfig) -> f64 {
        let fixed = self
            .overrides
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&sensor.sensor_code)
            .copied();
        fixed.unwrap_or_else(|| {
            let (lo, hi) = (sensor.min_possible_value, sensor.max_possible_value);
            let raw = if lo < hi {
                rand::thread_rng().gen_range(lo..=hi)
            } else {
                lo
            };
            (raw * 100.0).round() / 100.0
        })
    }
}

fn simulate_sensor(
    ctx: &WorkerContext,
    sensor: &SensorConfig,
    source: &dyn ValueSource,
    on_reading: &dyn Fn(Reading),
) -> WorkResult {
    let interval = Duration::from_secs(sensor.emit_every.max(1));
    while !ctx.is_cancelled() {
        let value = source.next_value(sensor);
        match encode_frame(&sensor.sensor_code, value) {
            Ok(frame) => {
                if let Some(reading) = decode_frame(&mut Cursor::new(frame))? {
                    on_reading(reading);
                }
            }
            Err(e) => warn!("Valor simulado descartado para {}: {e}", sensor.sensor_code),
        }
        std::thread::sleep(interval);
    }
    Ok(())
}

// ──────────────────────────────────────────────
// Worker
// ──────────────────────────────────────────────

/// Origem das leituras, escolhida no boot.
#[derive(Clone)]
pub enum TelemetryMode {
    Radio(Arc<dyn RadioLink>),
    Simulated(Arc<dyn ValueSource>),
}

/// Inicia o worker de escuta (`restart_on_exit`). No modo simulado ele
/// cria um worker por sensor e espera por eles.
pub fn start(
    supervisor: &Supervisor,
    mode: TelemetryMode,
    config: RadioConfig,
    store: Arc<SiteStore>,
    on_reading: ReadingCallback,
) {
    let children = supervisor.clone();
    supervisor.start(
        WorkerSpec::new(LISTENER_WORKER_NAME, move |ctx| match &mode {
            TelemetryMode::Radio(link) => {
                let mut port = link.open()?;
                info!("Porta do rádio aberta {}", link.describe());
                listen_radio(port.as_mut(), &config, ctx, on_reading.as_ref())?;
                Ok(())
            }
            TelemetryMode::Simulated(source) => {
                let handles: Vec<_> = store
                    .sensors()
                    .into_iter()
                    .filter_map(|sensor| {
                        let source = Arc::clone(source);
                        let on_reading = Arc::clone(&on_reading);
                        let name = format!("Listen for sensor {}", sensor.sensor_code);
                        children.start(
                            WorkerSpec::new(name, move |ctx| {
                                simulate_sensor(ctx, &sensor, source.as_ref(), on_reading.as_ref())
                            })
                            .exclusive(),
                        )
                    })
                    .collect();
                for handle in handles {
                    handle.join();
                }
                Ok(())
            }
        })
        .restart_on_exit(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::tests::{fast_supervisor, wait_until};
    use crate::supervisor::CancelToken;
    use crossbeam_channel::unbounded;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Porta em memória: cada chunk chega quando o anterior foi consumido.
    struct MemoryPort {
        current: Cursor<Vec<u8>>,
        pending: VecDeque<Vec<u8>>,
        cleared: bool,
    }

    impl MemoryPort {
        fn new(chunks: Vec<&[u8]>) -> Self {
            let mut pending: VecDeque<Vec<u8>> = chunks.into_iter().map(<[u8]>::to_vec).collect();
            Self {
                current: Cursor::new(pending.pop_front().unwrap_or_default()),
                pending,
                cleared: false,
            }
        }

        fn remaining(&self) -> usize {
            self.current.get_ref().len() - self.current.position() as usize
        }
    }

    /// Sem bytes no bloco atual a leitura estoura o timeout, como na porta real.
    impl Read for MemoryPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.current.read(buf)? {
                0 if !buf.is_empty() => Err(io::Error::new(io::ErrorKind::TimedOut, "timeout")),
                n => Ok(n),
            }
        }
    }

    impl RadioPort for MemoryPort {
        fn bytes_to_read(&mut self) -> io::Result<usize> {
            if self.remaining() == 0 {
                if let Some(next) = self.pending.pop_front() {
                    self.current = Cursor::new(next);
                }
            }
            Ok(self.remaining())
        }

        fn clear_input(&mut self) -> io::Result<()> {
            self.current = Cursor::new(Vec::new());
            self.cleared = true;
            Ok(())
        }
    }

    fn context() -> WorkerContext {
        WorkerContext {
            name: "teste".into(),
            cancel: CancelToken::new(),
        }
    }

    #[test]
    fn drain_skips_garbage_and_battery_frames() {
        let mut port = MemoryPort::new(vec![b"xxaZGT20.00---aZGBc0------aSAH50.50---"]);
        let seen = Mutex::new(Vec::new());
        let count = drain_port(&mut port, &|r| seen.lock().unwrap().push((r.sensor_code, r.value))).unwrap();

        assert_eq!(count, 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("ZGT".to_string(), 20.0), ("SAH".to_string(), 50.5)]
        );
    }

    #[test]
    fn truncated_frame_waits_for_next_cycle() {
        let mut port = MemoryPort::new(vec![&b"aZGT20.00---aZ"[..], &b"GT21.00---aSAH50.50---"[..]]);
        let seen = Mutex::new(Vec::new());

        let count = drain_port(&mut port, &|r| seen.lock().unwrap().push(r.value)).unwrap();
        assert_eq!(count, 1);

        let count = drain_port(&mut port, &|r| seen.lock().unwrap().push(r.value)).unwrap();
        assert_eq!(count, 1);
        assert_eq!(*seen.lock().unwrap(), vec![20.0, 50.5]);
    }

    #[test]
    fn listen_discards_stale_input() {
        let mut port = MemoryPort::new(vec![b"aZGT99.00---", b"aZGT21.00---"]);
        let config = RadioConfig {
            wait_secs: 0.001,
            settle_ms: 0,
            ..Default::default()
        };
        let ctx = context();
        let seen = Mutex::new(Vec::new());

        listen_radio(&mut port, &config, &ctx, &|r| {
            seen.lock().unwrap().push(r.value);
            ctx.cancel.cancel();
        })
        .unwrap();

        assert!(port.cleared);
        assert_eq!(*seen.lock().unwrap(), vec![21.0]);
    }

    #[test]
    fn synthetic_values_stay_in_bounds() {
        let source = SyntheticValues::new();
        let sensor = SensorConfig {
            sensor_code: "ZGT".into(),
            min_possible_value: -5.0,
            max_possible_value: 5.0,
            ..Default::default()
        };
        for _ in 0..100 {
            let v = source.next_value(&sensor);
            assert!((-5.0..=5.0).contains(&v));
        }

        source.set_override("ZGT", Some(42.0));
        assert_eq!(source.next_value(&sensor), 42.0);
        source.set_override("ZGT", None);
        assert!(source.next_value(&sensor) <= 5.0);
    }

    #[test]
    fn simulated_mode_emits_for_every_sensor() {
        let supervisor = fast_supervisor();
        let store = Arc::new(SiteStore::from_config(&Default::default()));
        let source = Arc::new(SyntheticValues::new());
        source.set_override("ZGH", Some(55.5));

        let (tx, rx) = unbounded();
        start(
            &supervisor,
            TelemetryMode::Simulated(source),
            RadioConfig::default(),
            store,
            Arc::new(move |r: Reading| {
                let _ = tx.send(r);
            }),
        );

        let mut codes = HashMap::new();
        while codes.len() < 2 {
            let r = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            codes.insert(r.sensor_code, r.value);
        }
        assert_eq!(codes["ZGH"], 55.5);
        assert!(supervisor.any_live_by_name(LISTENER_WORKER_NAME));
        assert!(wait_until(Duration::from_secs(1), || supervisor
            .any_live_by_name("Listen for sensor ZGT")));
        supervisor.shutdown();
    }
}
