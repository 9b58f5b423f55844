//! Arquivo histórico das leituras (séries temporais).
//!
//! O pipeline grava uma leitura por chamada a [`SeriesArchive::add`]; o
//! snapshot inicial consulta a última leitura e o histórico recente.
//! [`MemoryArchive`] guarda os últimos pontos de cada série em memória.

use crate::types::{Reading, SeriesDefinition};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Erro de I/O em {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Linha {line} inválida em {path}: {reason}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// Colaborador de séries temporais.
pub trait SeriesArchive: Send + Sync {
    /// Grava a leitura, criando a série na primeira chamada.
    fn add(&self, reading: &Reading, series: &SeriesDefinition) -> Result<(), ArchiveError>;

    /// Última leitura gravada na série.
    fn last(&self, series: &SeriesDefinition) -> Result<Option<Reading>, ArchiveError>;

    /// Leituras desde `since`, em ordem cronológica.
    fn history(&self, series: &SeriesDefinition, since: DateTime<Utc>) -> Result<Vec<Reading>, ArchiveError>;
}

/// Séries em memória, limitadas a `capacity` pontos cada.
#[derive(Debug)]
pub struct MemoryArchive {
    series: Mutex<HashMap<String, VecDeque<Reading>>>,
    capacity: usize,
}

impl MemoryArchive {
    pub fn new(capacity: usize) -> Self {
        Self {
            series: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }
}

impl SeriesArchive for MemoryArchive {
    fn add(&self, reading: &Reading, series: &SeriesDefinition) -> Result<(), ArchiveError> {
        let mut all = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        let points = all.entry(series.name.clone()).or_default();
        points.push_back(reading.clone());
        while points.len() > self.capacity {
            points.pop_front();
        }
        Ok(())
    }

    fn last(&self, series: &SeriesDefinition) -> Result<Option<Reading>, ArchiveError> {
        let all = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(all.get(&series.name).and_then(|p| p.back().cloned()))
    }

    fn history(&self, series: &SeriesDefinition, since: DateTime<Utc>) -> Result<Vec<Reading>, ArchiveError> {
        let all = self.series.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(all
            .get(&series.name)
            .map(|p| p.iter().filter(|r| r.read_ts >= since).cloned().collect())
            .unwrap_or_default())
    }
}
