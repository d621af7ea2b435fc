//! Wire encoding of commands and incremental decoding of replies.
//!
//! Text replies are LF-terminated (an optional CR before the LF is stripped).
//! The spectrum reply is the only binary frame: the `spectrum:` prefix, a
//! fixed-size little-endian readout, then a single LF. Because the readout may
//! itself contain LF bytes it is framed by length, never by delimiter.

use bytes::{Buf, BytesMut};

use super::{AccessMode, Command, Reply};
use crate::calibration::Calibration;
use crate::error::{AppResult, MinispecError};
use crate::processing::RawSpectrum;

/// Longest text reply accepted before the frame is declared malformed.
pub const MAX_LINE_BYTES: usize = 1024;

const TERMINATOR: &str = "\r\n";
const SPECTRUM_PREFIX: &[u8] = b"spectrum:";

/// Encode a command as the bytes written to the control channel.
pub fn encode(command: &Command) -> Vec<u8> {
    let body = match command {
        Command::GetStatus => "get_status".to_string(),
        Command::GetExposure => "get_exposure".to_string(),
        Command::SetExposure(ms) => format!("set_exposure{}", ms),
        Command::GetCalibration => "get_calibration".to_string(),
        Command::SetCalibration(cal) => {
            format!("set_cal{},{},{},{}", cal.c1, cal.c2, cal.c3, cal.c4)
        }
        Command::TakeSpectrum => "take_spectrum".to_string(),
        Command::GetSpectrum => "get_spectrum".to_string(),
        Command::SetWifi { ssid, key } => format!("set_wifi{},{}", ssid, key),
    };
    format!("{}{}", body, TERMINATOR).into_bytes()
}

/// Incremental reply decoder over a receive buffer.
///
/// Call [`ReplyDecoder::decode`] after every read. `Ok(None)` means more bytes
/// are needed. A decode error consumes the offending frame so the next call
/// starts at a frame boundary. An oversized line is reported once; the rest of
/// it is dropped as it arrives.
#[derive(Debug, Clone)]
pub struct ReplyDecoder {
    max_line: usize,
    discarding: bool,
}

impl Default for ReplyDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplyDecoder {
    /// Decoder with the default line limit.
    pub fn new() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }

    /// Decoder with a custom line limit.
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            max_line,
            discarding: false,
        }
    }

    /// Forget any partially discarded line, e.g. after the transport changed.
    pub fn reset(&mut self) {
        self.discarding = false;
    }

    /// Try to take one complete reply off the front of `buf`.
    pub fn decode(&mut self, buf: &mut BytesMut) -> AppResult<Option<Reply>> {
        if self.discarding {
            match buf.iter().position(|&b| b == b'\n') {
                Some(newline) => {
                    buf.advance(newline + 1);
                    self.discarding = false;
                }
                None => {
                    buf.clear();
                    return Ok(None);
                }
            }
        }

        // Blank lines between replies carry nothing.
        let leading = buf
            .iter()
            .take_while(|&&b| b == b'\r' || b == b'\n')
            .count();
        buf.advance(leading);

        if buf.is_empty() {
            return Ok(None);
        }

        if buf.starts_with(SPECTRUM_PREFIX) {
            return self.decode_spectrum(buf);
        }
        // Could still grow into "spectrum:"; wait before treating it as text.
        if buf.len() < SPECTRUM_PREFIX.len() && SPECTRUM_PREFIX.starts_with(&buf[..]) {
            return Ok(None);
        }

        let Some(newline) = buf.iter().position(|&b| b == b'\n') else {
            if buf.len() > self.max_line {
                let len = buf.len();
                buf.clear();
                self.discarding = true;
                return Err(MinispecError::Protocol(format!(
                    "reply line exceeds {} bytes ({} buffered without terminator)",
                    self.max_line, len
                )));
            }
            return Ok(None);
        };

        let line = buf.split_to(newline + 1);
        if newline > self.max_line {
            return Err(MinispecError::Protocol(format!(
                "reply line exceeds {} bytes",
                self.max_line
            )));
        }
        let text = std::str::from_utf8(&line[..newline])
            .map_err(|_| MinispecError::Protocol("reply is not valid UTF-8".to_string()))?;
        parse_line(text.trim_end_matches('\r')).map(Some)
    }

    fn decode_spectrum(&mut self, buf: &mut BytesMut) -> AppResult<Option<Reply>> {
        let frame_len = SPECTRUM_PREFIX.len() + RawSpectrum::WIRE_BYTES + 1;
        if buf.len() < frame_len {
            return Ok(None);
        }
        let frame = buf.split_to(frame_len);
        let payload = &frame[SPECTRUM_PREFIX.len()..frame_len - 1];
        if frame[frame_len - 1] != b'\n' {
            return Err(MinispecError::Protocol(format!(
                "spectrum frame not terminated after {} payload bytes",
                RawSpectrum::WIRE_BYTES
            )));
        }
        let raw = RawSpectrum::from_le_bytes(payload).ok_or_else(|| {
            MinispecError::Protocol("spectrum payload has the wrong size".to_string())
        })?;
        Ok(Some(Reply::Spectrum(raw)))
    }
}

/// Parse a single text reply (without its line terminator).
pub fn parse_line(line: &str) -> AppResult<Reply> {
    let line = line.trim();

    if line == "spectrum_complete" {
        return Ok(Reply::SpectrumComplete);
    }
    if line == "denied" {
        return Ok(Reply::Denied(None));
    }

    let Some((kind, value)) = line.split_once(':') else {
        return Err(unrecognised(line));
    };
    let value = value.trim();

    match kind {
        "status" => match value {
            "owner" => Ok(Reply::Status(AccessMode::Owner)),
            "read_only" | "readonly" => Ok(Reply::Status(AccessMode::ReadOnly)),
            other => Err(MinispecError::Protocol(format!(
                "unknown access mode '{}'",
                other
            ))),
        },
        "exposure" => value.parse::<u32>().map(Reply::Exposure).map_err(|e| {
            MinispecError::Protocol(format!("invalid exposure '{}': {}", value, e))
        }),
        "calibration" => parse_calibration(value).map(Reply::Calibration),
        "wifi" => Ok(Reply::Wifi(value.to_string())),
        "denied" => Ok(Reply::Denied(Some(value.to_string()).filter(|r| !r.is_empty()))),
        _ => Err(unrecognised(line)),
    }
}

fn parse_calibration(value: &str) -> AppResult<Calibration> {
    let coefficients = value
        .split(',')
        .filter(|field| !field.trim().is_empty())
        .map(|field| {
            field.trim().parse::<f64>().map_err(|e| {
                MinispecError::Protocol(format!("invalid calibration coefficient '{}': {}", field, e))
            })
        })
        .collect::<AppResult<Vec<f64>>>()?;

    Calibration::from_coefficients(&coefficients).ok_or_else(|| {
        MinispecError::Protocol(format!(
            "calibration needs {} coefficients, got {}",
            Calibration::COEFFICIENTS,
            coefficients.len()
        ))
    })
}

fn unrecognised(line: &str) -> MinispecError {
    let shown: String = line.chars().take(64).collect();
    MinispecError::Protocol(format!("unrecognised reply '{}'", shown))
}
