//! Séries temporais em CSV: um arquivo por série, uma linha por leitura
//! (`timestamp RFC 3339,valor`).
//!
//! Cada arquivo guarda no máximo `max_points` leituras mais uma folga de
//! um quarto; ao passar disso ele é reescrito só com as mais recentes.

use chrono::{DateTime, Utc};
use farmwatch_core::archive::{ArchiveError, SeriesArchive};
use farmwatch_core::types::{Reading, SeriesDefinition};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

#[derive(Debug)]
pub struct CsvArchive {
    max_points: usize,
    /// Linhas por arquivo; o lock também serializa o acesso entre workers
    lines: Mutex<HashMap<PathBuf, usize>>,
}

impl CsvArchive {
    pub fn new(max_points: usize) -> Self {
        Self {
            max_points: max_points.max(1),
            lines: Mutex::new(HashMap::new()),
        }
    }

    fn limit(&self) -> usize {
        self.max_points + (self.max_points / 4).max(1)
    }

    /// Reescreve a série só com as `max_points` leituras mais recentes.
    fn compact(&self, series: &SeriesDefinition) -> Result<usize, ArchiveError> {
        let readings = self.read_series(series)?;
        let kept = &readings[readings.len().saturating_sub(self.max_points)..];

        let tmp = series.path.with_extension("csv.tmp");
        let io_err = |source| ArchiveError::Io {
            path: series.path.clone(),
            source,
        };
        let mut content = String::new();
        for reading in kept {
            content.push_str(&format_line(reading));
        }
        fs::write(&tmp, content).map_err(io_err)?;
        fs::rename(&tmp, &series.path).map_err(io_err)?;

        debug!("Série {} compactada para {} pontos", series.name, kept.len());
        Ok(kept.len())
    }

    fn read_series(&self, series: &SeriesDefinition) -> Result<Vec<Reading>, ArchiveError> {
        let path = &series.path;
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ArchiveError::Io {
                    path: path.clone(),
                    source,
                });
            }
        };

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| parse_line(path, n + 1, line, &series.name))
            .collect()
    }
}

fn count_lines(path: &Path) -> io::Result<usize> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.lines().filter(|l| !l.trim().is_empty()).count()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}

fn format_line(reading: &Reading) -> String {
    format!("{},{}\n", reading.read_ts.to_rfc3339(), reading.value)
}

fn parse_line(path: &Path, line_no: usize, line: &str, code: &str) -> Result<Reading, ArchiveError> {
    let corrupt = |reason: String| ArchiveError::Corrupt {
        path: path.to_path_buf(),
        line: line_no,
        reason,
    };
    let (ts, value) = line
        .split_once(',')
        .ok_or_else(|| corrupt("separador ausente".into()))?;
    let read_ts = DateTime::parse_from_rfc3339(ts.trim())
        .map_err(|e| corrupt(e.to_string()))?
        .with_timezone(&Utc);
    let value = value.trim().parse::<f64>().map_err(|e| corrupt(format!("{e}")))?;
    Ok(Reading {
        sensor_code: code.to_string(),
        value,
        read_ts,
    })
}

impl SeriesArchive for CsvArchive {
    fn add(&self, reading: &Reading, series: &SeriesDefinition) -> Result<(), ArchiveError> {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        let io_err = |source| ArchiveError::Io {
            path: series.path.clone(),
            source,
        };

        if !series.path.exists() {
            if let Some(dir) = series.path.parent() {
                fs::create_dir_all(dir).map_err(io_err)?;
            }
            info!("Criando série {} em {}", series.name, series.path.display());
        }

        let count = match lines.get(&series.path) {
            Some(count) => *count,
            None => count_lines(&series.path).map_err(io_err)?,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&series.path)
            .map_err(io_err)?;
        file.write_all(format_line(reading).as_bytes()).map_err(io_err)?;
        drop(file);

        let count = if count + 1 > self.limit() {
            self.compact(series)?
        } else {
            count + 1
        };
        lines.insert(series.path.clone(), count);
        Ok(())
    }

    fn last(&self, series: &SeriesDefinition) -> Result<Option<Reading>, ArchiveError> {
        let _guard = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_series(series)?.pop())
    }

    fn history(&self, series: &SeriesDefinition, since: DateTime<Utc>) -> Result<Vec<Reading>, ArchiveError> {
        let _guard = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        let mut readings = self.read_series(series)?;
        readings.retain(|r| r.read_ts >= since);
        Ok(readings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use farmwatch_core::types::SensorConfig;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("farmwatch-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn series(dir: &Path) -> SeriesDefinition {
        SensorConfig {
            sensor_code: "ZGT".into(),
            emit_every: 60,
            ..Default::default()
        }
        .series_definition(dir)
    }

    #[test]
    fn appends_and_reads_back() {
        let dir = temp_dir("append");
        let series = series(&dir);
        assert!(series.path.ends_with("ZGT-60.csv"));

        let archive = CsvArchive::new(100);
        assert_eq!(archive.last(&series).unwrap(), None);

        let mut old = Reading::new("ZGT", 1.5);
        old.read_ts = Utc::now() - Duration::days(3);
        archive.add(&old, &series).unwrap();
        archive.add(&Reading::new("ZGT", 22.25), &series).unwrap();

        assert_eq!(archive.last(&series).unwrap().unwrap().value, 22.25);
        let recent = archive.history(&series, Utc::now() - Duration::days(1)).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].sensor_code, "ZGT");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn file_is_compacted_to_latest_points() {
        let dir = temp_dir("compact");
        let series = series(&dir);
        let archive = CsvArchive::new(4);

        for v in 0..10 {
            archive.add(&Reading::new("ZGT", f64::from(v)), &series).unwrap();
            assert!(count_lines(&series.path).unwrap() <= 5);
        }

        let values: Vec<f64> = archive
            .history(&series, Utc::now() - Duration::days(1))
            .unwrap()
            .iter()
            .map(|r| r.value)
            .collect();
        assert_eq!(values, vec![6.0, 7.0, 8.0, 9.0]);

        // um novo processo retoma a contagem pelo arquivo
        let reopened = CsvArchive::new(4);
        reopened.add(&Reading::new("ZGT", 10.0), &series).unwrap();
        reopened.add(&Reading::new("ZGT", 11.0), &series).unwrap();
        assert_eq!(count_lines(&series.path).unwrap(), 4);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_line_is_reported() {
        let dir = temp_dir("corrupt");
        let series = series(&dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(&series.path, "ontem,1.0\n").unwrap();

        let err = CsvArchive::new(100).last(&series).unwrap_err();
        assert!(matches!(err, ArchiveError::Corrupt { line: 1, .. }));

        let _ = fs::remove_dir_all(&dir);
    }
}
