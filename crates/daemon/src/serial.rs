//! Portas seriais reais: rádio de telemetria e placa de relés.

use farmwatch_core::config::{RadioConfig, RelayBoardConfig};
use farmwatch_core::listener::{RadioLink, RadioPort};
use farmwatch_core::relay::RelayTransport;
use serialport::{ClearBuffer, SerialPort};
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::debug;

/// Timeout de leitura do rádio (o loop só lê bytes já disponíveis).
const RADIO_READ_TIMEOUT: Duration = Duration::from_secs(1);

// ──────────────────────────────────────────────
// Rádio
// ──────────────────────────────────────────────

pub struct SerialRadio {
    port: String,
    baud: u32,
}

impl SerialRadio {
    pub fn new(config: &RadioConfig) -> Self {
        Self {
            port: config.port.clone(),
            baud: config.baud,
        }
    }
}

impl RadioLink for SerialRadio {
    fn open(&self) -> io::Result<Box<dyn RadioPort>> {
        let port = serialport::new(&self.port, self.baud)
            .timeout(RADIO_READ_TIMEOUT)
            .open()?;
        Ok(Box::new(RadioSerial(port)))
    }

    fn describe(&self) -> String {
        format!("{} @ {} baud", self.port, self.baud)
    }
}

struct RadioSerial(Box<dyn SerialPort>);

impl Read for RadioSerial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl RadioPort for RadioSerial {
    fn bytes_to_read(&mut self) -> io::Result<usize> {
        Ok(self.0.bytes_to_read()? as usize)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        Ok(self.0.clear(ClearBuffer::Input)?)
    }
}

// ──────────────────────────────────────────────
// Placa de relés
// ──────────────────────────────────────────────

/// Abre a porta a cada transação, como a placa espera.
pub struct SerialRelayBoard {
    config: RelayBoardConfig,
}

impl SerialRelayBoard {
    pub fn new(config: &RelayBoardConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl RelayTransport for SerialRelayBoard {
    fn transact(&mut self, command: &str) -> io::Result<String> {
        let mut port = serialport::new(&self.config.port, self.config.baud)
            .timeout(Duration::from_millis(self.config.io_timeout_ms))
            .open()?;

        std::thread::sleep(Duration::from_millis(self.config.settle_ms));
        port.clear(ClearBuffer::Input)?;
        port.write_all(command.as_bytes())?;
        port.flush()?;
        std::thread::sleep(Duration::from_millis(self.config.response_wait_ms));

        let line = read_line(port.as_mut())?;
        debug!("Placa respondeu {line:?} para {command}");
        Ok(line)
    }
}

/// Lê até `\n`. Um timeout com bytes já recebidos devolve o parcial.
fn read_line<R: Read + ?Sized>(port: &mut R) -> io::Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match port.read(&mut byte) {
            Ok(0) => break,
            Ok(_) if byte[0] == b'\n' => break,
            Ok(_) => line.push(byte[0]),
            Err(e) if e.kind() == io::ErrorKind::TimedOut && !line.is_empty() => break,
            Err(e) => return Err(e),
        }
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// Devolve os bytes e depois timeout, como uma porta serial.
    struct TimeoutAfter(Cursor<Vec<u8>>);

    impl Read for TimeoutAfter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.read(buf)? {
                0 => Err(io::Error::new(io::ErrorKind::TimedOut, "timeout")),
                n => Ok(n),
            }
        }
    }

    #[test]
    fn reads_single_line() {
        let mut port = TimeoutAfter(Cursor::new(b"13_ON\r\n7_OF\r\n".to_vec()));
        assert_eq!(read_line(&mut port).unwrap(), "13_ON\r");
    }

    #[test]
    fn timeout_returns_partial_line() {
        let mut port = TimeoutAfter(Cursor::new(b"13_ON---".to_vec()));
        assert_eq!(read_line(&mut port).unwrap(), "13_ON---");
    }

    #[test]
    fn timeout_without_data_is_an_error() {
        let mut port = TimeoutAfter(Cursor::new(Vec::new()));
        assert_eq!(read_line(&mut port).unwrap_err().kind(), io::ErrorKind::TimedOut);
    }
}
