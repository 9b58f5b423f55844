//! Protocolo de telemetria do rádio (frames estilo LLAP).
//!
//! Formato do frame:
//!
//! ```text
//! ┌───────────┬───────────┬──────────────────────────┐
//! │ Marker(1) │ Código(3) │ Valor (8, padding '-')   │
//! └───────────┴───────────┴──────────────────────────┘
//! ```
//!
//! - Marker `'a'` inicia o frame
//! - Código do sensor: 2 caracteres de dispositivo + 1 de tipo de medição
//! - Valor numérico alinhado à esquerda, completado com `'-'`
//!
//! Exemplo: `aZGT23.50---`. Com o medidor de bateria desligado o rádio
//! envia `aZGBc0------`, que não é numérico e é descartado.

use crate::types::Reading;
use std::io::{self, Read};
use tracing::trace;

/// Byte que inicia um frame.
pub const FRAME_MARKER: u8 = b'a';

/// Tamanho do código do sensor.
pub const CODE_LEN: usize = 3;

/// Largura do campo de valor.
pub const VALUE_LEN: usize = 8;

/// Bytes após o marker.
pub const FRAME_BODY_LEN: usize = CODE_LEN + VALUE_LEN;

/// Caractere de preenchimento do valor.
pub const PADDING: char = '-';

/// Erros de codificação de frames.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ProtocolError {
    #[error("Código de sensor inválido: {0:?} (esperado {CODE_LEN} caracteres ASCII)")]
    InvalidCode(String),

    #[error("Valor {0} não cabe em {VALUE_LEN} caracteres")]
    ValueTooWide(String),

    #[error("Valor não finito: {0}")]
    NonFinite(f64),
}

/// Resultado da leitura de uma posição do stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Frame válido.
    Reading(Reading),
    /// Byte lido não é o marker; nada mais foi consumido.
    NotMarker(u8),
    /// Corpo consumido mas inválido (valor não numérico, código não UTF-8).
    Malformed(String),
}

/// Lê uma posição do stream: 1 byte de marker e, se for o marker, o corpo
/// de [`FRAME_BODY_LEN`] bytes.
///
/// Não procura o próximo marker: a ressincronização fica com o chamador,
/// que simplesmente chama de novo.
pub fn read_frame<R: Read + ?Sized>(stream: &mut R) -> io::Result<Frame> {
    let mut marker = [0u8; 1];
    stream.read_exact(&mut marker)?;
    if marker[0] != FRAME_MARKER {
        return Ok(Frame::NotMarker(marker[0]));
    }

    let mut body = [0u8; FRAME_BODY_LEN];
    stream.read_exact(&mut body)?;
    Ok(parse_body(&body))
}

/// Como [`read_frame`], mas reduz o resultado a `Option<Reading>`.
pub fn decode_frame<R: Read + ?Sized>(stream: &mut R) -> io::Result<Option<Reading>> {
    Ok(match read_frame(stream)? {
        Frame::Reading(reading) => Some(reading),
        Frame::NotMarker(_) => None,
        Frame::Malformed(body) => {
            trace!("Erro ao interpretar número do frame {body:?}");
            None
        }
    })
}

fn parse_body(body: &[u8; FRAME_BODY_LEN]) -> Frame {
    let Ok(text) = std::str::from_utf8(body) else {
        return Frame::Malformed(String::from_utf8_lossy(body).into_owned());
    };
    let Some((code, raw_value)) = text.split_at_checked(CODE_LEN) else {
        return Frame::Malformed(text.to_string());
    };

    match raw_value.trim_end_matches(PADDING).parse::<f64>() {
        Ok(value) if value.is_finite() => Frame::Reading(Reading::new(code, value)),
        _ => Frame::Malformed(text.to_string()),
    }
}

/// Codifica um frame completo (marker + código + valor com 2 casas).
pub fn encode_frame(sensor_code: &str, value: f64) -> Result<Vec<u8>, ProtocolError> {
    if sensor_code.len() != CODE_LEN || !sensor_code.is_ascii() {
        return Err(ProtocolError::InvalidCode(sensor_code.to_string()));
    }
    if !value.is_finite() {
        return Err(ProtocolError::NonFinite(value));
    }

    let digits = format!("{value:.2}");
    if digits.len() > VALUE_LEN {
        return Err(ProtocolError::ValueTooWide(digits));
    }

    let mut frame = Vec::with_capacity(1 + FRAME_BODY_LEN);
    frame.push(FRAME_MARKER);
    frame.extend_from_slice(sensor_code.as_bytes());
    frame.extend_from_slice(format!("{digits:-<width$}", width = VALUE_LEN).as_bytes());
    Ok(frame)
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn decodes_reference_frame() {
        let before = chrono::Utc::now();
        let mut stream = Cursor::new(b"aABT152.123-".to_vec());
        let reading = decode_frame(&mut stream).unwrap().unwrap();

        assert_eq!(reading.sensor_code, "ABT");
        assert!((reading.value - 152.123).abs() < 1e-9);
        assert!(reading.read_ts >= before);
    }

    #[test]
    fn encode_pads_value_field() {
        let frame = encode_frame("ZGT", 23.5).unwrap();
        assert_eq!(frame, b"aZGT23.50---");
        assert_eq!(frame.len(), 1 + FRAME_BODY_LEN);
    }

    #[test]
    fn encode_decode_roundtrip() {
        for (code, value) in [("ZGT", -12.25), ("SAH", 99999.99), ("ABB", 0.0)] {
            let frame = encode_frame(code, value).unwrap();
            let reading = decode_frame(&mut Cursor::new(frame)).unwrap().unwrap();
            assert_eq!(reading.sensor_code, code);
            assert_eq!(reading.value, value);
        }
    }

    #[test]
    fn non_marker_byte_does_not_corrupt_stream() {
        let mut bytes = b"x".to_vec();
        bytes.extend_from_slice(b"aZGH45.00---");
        let mut stream = Cursor::new(bytes);

        assert_eq!(read_frame(&mut stream).unwrap(), Frame::NotMarker(b'x'));
        let reading = decode_frame(&mut stream).unwrap().unwrap();
        assert_eq!(reading.sensor_code, "ZGH");
        assert_eq!(reading.value, 45.0);
    }

    #[test]
    fn battery_frame_is_skipped() {
        let mut stream = Cursor::new(b"aZGBc0------aZGT20.00---".to_vec());
        assert!(matches!(read_frame(&mut stream).unwrap(), Frame::Malformed(_)));
        assert_eq!(decode_frame(&mut stream).unwrap().unwrap().value, 20.0);
    }

    #[test]
    fn all_padding_is_malformed() {
        let mut stream = Cursor::new(b"aZGT--------".to_vec());
        assert_eq!(decode_frame(&mut stream).unwrap(), None);
    }

    #[test]
    fn truncated_frame_is_io_error() {
        let mut stream = Cursor::new(b"aZGT2".to_vec());
        let err = read_frame(&mut stream).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn rejects_bad_codes_and_wide_values() {
        assert!(matches!(
            encode_frame("ZG", 1.0),
            Err(ProtocolError::InvalidCode(_))
        ));
        assert!(matches!(
            encode_frame("ZGT", 123456.0),
            Err(ProtocolError::ValueTooWide(_))
        ));
        assert_eq!(
            encode_frame("ZGT", f64::NAN).unwrap_err().to_string(),
            "Valor não finito: NaN"
        );
    }
}
