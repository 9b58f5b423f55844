//! Detecção de anomalias – janela deslizante por sensor.
//!
//! Um alarme exige a janela cheia (N leituras) com pelo menos K leituras
//! fora dos limites de aviso. Após um alarme a janela é esvaziada e o
//! sensor entra em cooldown (`warning_wait_minutes`).

use crate::types::{BreachSide, Reading, SensorConfig, Warning};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Estado de execução de um sensor: últimas N leituras e último alarme.
#[derive(Debug, Clone, Default)]
pub struct SensorWindow {
    readings: VecDeque<Reading>,
    capacity: usize,
    last_alarm: Option<DateTime<Utc>>,
}

impl SensorWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: VecDeque::with_capacity(capacity),
            capacity,
            last_alarm: None,
        }
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last_alarm(&self) -> Option<DateTime<Utc>> {
        self.last_alarm
    }

    pub fn readings(&self) -> impl Iterator<Item = &Reading> {
        self.readings.iter()
    }

    /// Adiciona a leitura, ajustando a capacidade se N mudou na configuração.
    pub fn update(&mut self, reading: Reading, capacity: usize) {
        let capacity = capacity.max(1);
        if capacity != self.capacity {
            debug!(
                "Janela de {} redimensionada {} → {}",
                reading.sensor_code, self.capacity, capacity
            );
            self.capacity = capacity;
        }

        self.readings.push_back(reading);
        while self.readings.len() > self.capacity {
            self.readings.pop_front();
        }
    }

    /// Avalia a janela em `now` e retorna zero, um ou dois avisos.
    pub fn evaluate(&mut self, sensor: &SensorConfig, now: DateTime<Utc>) -> Vec<Warning> {
        if let (Some(last), Some(wait)) = (self.last_alarm, sensor.warning_wait_minutes) {
            if now - last < Duration::minutes(i64::from(wait)) {
                return Vec::new();
            }
        }

        if self.readings.len() < self.capacity {
            return Vec::new();
        }

        let (low, high): (Vec<Reading>, Vec<Reading>) = (
            self.readings
                .iter()
                .filter(|r| sensor.is_value_too_low(r.value))
                .cloned()
                .collect(),
            self.readings
                .iter()
                .filter(|r| sensor.is_value_too_high(r.value))
                .cloned()
                .collect(),
        );

        let breaches = low.len() + high.len();
        if breaches == 0 || breaches < sensor.observable_alarming_measurements {
            return Vec::new();
        }

        self.readings.clear();
        self.last_alarm = Some(now);

        let mut warnings = Vec::with_capacity(2);
        if let (Some(limit), Some(value)) = (sensor.min_warning_value, extreme(&low, f64::min)) {
            warnings.push(Warning {
                side: BreachSide::Low,
                limit,
                value,
                created_ts: now,
                sensor: sensor.clone(),
                alarming_readings: low,
            });
            info!("Valores alarmantes em {}: muito baixo {value} < {limit}", sensor.sensor_code);
        }
        if let (Some(limit), Some(value)) = (sensor.max_warning_value, extreme(&high, f64::max)) {
            warnings.push(Warning {
                side: BreachSide::High,
                limit,
                value,
                created_ts: now,
                sensor: sensor.clone(),
                alarming_readings: high,
            });
            info!("Valores alarmantes em {}: muito alto {value} > {limit}", sensor.sensor_code);
        }
        warnings
    }
}

fn extreme(readings: &[Reading], pick: fn(f64, f64) -> f64) -> Option<f64> {
    readings.iter().map(|r| r.value).reduce(pick)
}

// ──────────────────────────────────────────────
// Registro de janelas
// ──────────────────────────────────────────────

/// Janelas de todos os sensores, criadas sob demanda e mantidas pela vida
/// do processo. Cada janela tem seu próprio lock: sensores diferentes são
/// atualizados em paralelo, o mesmo sensor é serializado.
#[derive(Debug, Default)]
pub struct WindowRegistry {
    windows: Mutex<HashMap<String, Arc<Mutex<SensorWindow>>>>,
}

impl WindowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn window(&self, sensor: &SensorConfig) -> Arc<Mutex<SensorWindow>> {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            windows
                .entry(sensor.sensor_code.clone())
                .or_insert_with(|| Arc::new(Mutex::new(SensorWindow::new(sensor.observable_measurements)))),
        )
    }

    /// Aplica a leitura à janela do sensor e avalia em seguida.
    pub fn update_and_evaluate(&self, sensor: &SensorConfig, reading: Reading) -> Vec<Warning> {
        self.update_and_evaluate_at(sensor, reading, Utc::now())
    }

    pub fn update_and_evaluate_at(
        &self,
        sensor: &SensorConfig,
        reading: Reading,
        now: DateTime<Utc>,
    ) -> Vec<Warning> {
        let window = self.window(sensor);
        let mut window = window.lock().unwrap_or_else(PoisonError::into_inner);
        window.update(reading, sensor.observable_measurements);
        window.evaluate(sensor, now)
    }

    /// Cópia da janela de um sensor.
    pub fn snapshot(&self, sensor_code: &str) -> Option<SensorWindow> {
        let windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);
        windows
            .get(sensor_code)
            .map(|w| w.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sensor(min: Option<f64>, max: Option<f64>) -> SensorConfig {
        SensorConfig {
            sensor_code: "ZGT".into(),
            min_warning_value: min,
            max_warning_value: max,
            observable_measurements: 3,
            observable_alarming_measurements: 2,
            warning_wait_minutes: Some(10),
            ..Default::default()
        }
    }

    fn feed(
        registry: &WindowRegistry,
        sensor: &SensorConfig,
        values: &[f64],
        now: DateTime<Utc>,
    ) -> Vec<Vec<Warning>> {
        values
            .iter()
            .map(|v| registry.update_and_evaluate_at(sensor, Reading::new("ZGT", *v), now))
            .collect()
    }

    #[test]
    fn low_side_alarm_after_full_window() {
        let registry = WindowRegistry::new();
        let sensor = sensor(Some(10.0), None);
        let results = feed(&registry, &sensor, &[5.0, 8.0, 26.0], Utc::now());

        assert!(results[0].is_empty());
        assert!(results[1].is_empty());
        assert_eq!(results[2].len(), 1);

        let warning = &results[2][0];
        assert_eq!(warning.side, BreachSide::Low);
        assert_eq!(warning.limit, 10.0);
        assert_eq!(warning.value, 5.0);
        assert_eq!(warning.alarming_readings.len(), 2);
        assert!(registry.snapshot("ZGT").unwrap().is_empty());
    }

    #[test]
    fn single_breach_below_k_does_not_alarm() {
        let registry = WindowRegistry::new();
        let sensor = sensor(Some(10.0), None);
        let results = feed(&registry, &sensor, &[5.0, 25.0, 26.0], Utc::now());
        assert!(results.iter().all(Vec::is_empty));
        assert_eq!(registry.snapshot("ZGT").unwrap().len(), 3);
    }

    #[test]
    fn single_breach_alarms_when_k_is_one() {
        let registry = WindowRegistry::new();
        let sensor = SensorConfig {
            observable_alarming_measurements: 1,
            ..sensor(Some(10.0), None)
        };
        let results = feed(&registry, &sensor, &[5.0, 25.0, 26.0], Utc::now());
        assert_eq!(results[2].len(), 1);
        assert_eq!(results[2][0].side, BreachSide::Low);
        assert!(registry.snapshot("ZGT").unwrap().is_empty());
    }

    #[test]
    fn never_warns_with_partial_window() {
        let mut window = SensorWindow::new(3);
        let sensor = sensor(Some(10.0), None);
        for v in [1.0, 2.0] {
            window.update(Reading::new("ZGT", v), 3);
            assert!(window.evaluate(&sensor, Utc::now()).is_empty());
        }
    }

    #[test]
    fn cooldown_suppresses_second_alarm() {
        let registry = WindowRegistry::new();
        let sensor = sensor(Some(10.0), None);
        let t0 = Utc::now();

        let first = feed(&registry, &sensor, &[1.0, 2.0, 3.0], t0);
        assert_eq!(first[2].len(), 1);

        let during = feed(&registry, &sensor, &[1.0, 2.0, 3.0, 4.0], t0 + Duration::minutes(5));
        assert!(during.iter().all(Vec::is_empty));

        let after = registry.update_and_evaluate_at(
            &sensor,
            Reading::new("ZGT", 0.5),
            t0 + Duration::minutes(10),
        );
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].value, 0.5);
    }

    #[test]
    fn misconfigured_thresholds_fire_both_sides() {
        let registry = WindowRegistry::new();
        let sensor = sensor(Some(10.0), Some(20.0));
        let results = feed(&registry, &sensor, &[5.0, 25.0, 30.0], Utc::now());

        let sides: Vec<_> = results[2].iter().map(|w| (w.side, w.value)).collect();
        assert_eq!(sides, vec![(BreachSide::Low, 5.0), (BreachSide::High, 30.0)]);
    }

    #[test]
    fn resize_keeps_latest_readings() {
        let mut window = SensorWindow::new(3);
        for v in [1.0, 2.0, 3.0] {
            window.update(Reading::new("ZGT", v), 3);
        }
        window.update(Reading::new("ZGT", 4.0), 2);

        assert_eq!(window.capacity(), 2);
        let values: Vec<f64> = window.readings().map(|r| r.value).collect();
        assert_eq!(values, vec![3.0, 4.0]);
    }

    #[test]
    fn concurrent_updates_keep_window_bounded() {
        let registry = Arc::new(WindowRegistry::new());
        let sensor = sensor(None, None);

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let sensor = sensor.clone();
                std::thread::spawn(move || {
                    for n in 0..250 {
                        registry.update_and_evaluate(&sensor, Reading::new("ZGT", f64::from(i * 1000 + n)));
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        assert_eq!(registry.snapshot("ZGT").unwrap().len(), 3);
    }
}
