//! Common test utilities for minispec integration tests
//!
//! This module provides an in-process stand-in for the instrument's control
//! service. It speaks the line protocol over `tokio::io::duplex` and offers:
//! - Owner/read-only arbitration across connections
//! - Controllable failure injection (refused writes, garbage, silence)
//! - A command log for test verification

#![allow(dead_code)] // Utilities may not all be used by every test binary

use std::sync::{Arc, Mutex};
use std::time::Duration;

use minispec::processing::{RAW_PIXELS, SHIELDED_PIXELS};
use minispec::MinispecConfig;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};

/// Longest exposure the mock accepts; larger requests are clamped.
pub const MAX_EXPOSURE_MS: u32 = 10_000;
/// Counts the mock reports on shielded and leading pixels.
pub const MOCK_BIAS: u16 = 100;
/// Counts the mock reports on active pixels.
pub const MOCK_SIGNAL: u16 = 1100;

/// Settings with short timeouts so failure tests finish quickly.
pub fn test_config() -> MinispecConfig {
    let mut config = MinispecConfig::default();
    config.connection.reply_timeout_ms = 250;
    config
}

/// Readout with flat bias on the leading pixels and flat signal elsewhere.
pub fn flat_readout() -> Vec<u16> {
    let mut raw = vec![MOCK_SIGNAL; RAW_PIXELS];
    for count in raw.iter_mut().take(SHIELDED_PIXELS.end) {
        *count = MOCK_BIAS;
    }
    raw
}

struct InstrumentState {
    owner_connected: bool,
    exposure_ms: u32,
    calibration: [f64; 4],
    calibration_available: bool,
    readout: Vec<u16>,
    deny_writes: bool,
    realtime_exposure: bool,
    mute: bool,
    injected: Option<Vec<u8>>,
    call_log: Vec<String>,
}

/// Mock instrument control service
///
/// Each [`MockInstrument::connect`] returns the client end of a fresh
/// connection, served by a background task. The first connection to arrive
/// while no owner is connected becomes the owner.
#[derive(Clone)]
pub struct MockInstrument {
    state: Arc<Mutex<InstrumentState>>,
}

impl Default for MockInstrument {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInstrument {
    /// Instrument with factory-like defaults
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(InstrumentState {
                owner_connected: false,
                exposure_ms: 10,
                calibration: [0.0, 0.0, 0.2, 400.0],
                calibration_available: true,
                readout: flat_readout(),
                deny_writes: false,
                realtime_exposure: false,
                mute: false,
                injected: None,
                call_log: Vec::new(),
            })),
        }
    }

    /// Replace the readout served by `get_spectrum`
    pub fn with_readout(self, readout: Vec<u16>) -> Self {
        self.state.lock().unwrap().readout = readout;
        self
    }

    /// Answer `get_calibration` with an unparseable reply
    pub fn without_calibration(self) -> Self {
        self.state.lock().unwrap().calibration_available = false;
        self
    }

    /// Hold back `spectrum_complete` for the configured exposure time
    pub fn with_realtime_exposure(self) -> Self {
        self.state.lock().unwrap().realtime_exposure = true;
        self
    }

    /// Refuse every write, even from the owner
    pub fn deny_writes(&self, deny: bool) {
        self.state.lock().unwrap().deny_writes = deny;
    }

    /// Stop answering (commands are still logged)
    pub fn set_mute(&self, mute: bool) {
        self.state.lock().unwrap().mute = mute;
    }

    /// Send `bytes` instead of the next real reply
    pub fn inject_reply(&self, bytes: &[u8]) {
        self.state.lock().unwrap().injected = Some(bytes.to_vec());
    }

    /// Every command line received, in order, across all connections
    pub fn call_log(&self) -> Vec<String> {
        self.state.lock().unwrap().call_log.clone()
    }

    /// Number of logged commands starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.call_log()
            .iter()
            .filter(|line| line.starts_with(prefix))
            .count()
    }

    /// Open a new connection
    pub fn connect(&self) -> DuplexStream {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let is_owner = {
            let mut state = self.state.lock().unwrap();
            let is_owner = !state.owner_connected;
            state.owner_connected |= is_owner;
            is_owner
        };
        let state = Arc::clone(&self.state);
        tokio::spawn(serve(state, server, is_owner));
        client
    }

    /// Wait until the previous owner's connection has been torn down
    pub async fn wait_for_owner_release(&self) {
        for _ in 0..100 {
            if !self.state.lock().unwrap().owner_connected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("owner connection never closed");
    }
}

async fn serve(state: Arc<Mutex<InstrumentState>>, stream: DuplexStream, is_owner: bool) {
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut lines = BufReader::new(read_half).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let (reply, delay) = {
            let mut state = state.lock().unwrap();
            state.call_log.push(line.clone());
            let delay = if state.realtime_exposure && line == "take_spectrum" {
                Duration::from_millis(u64::from(state.exposure_ms))
            } else {
                Duration::ZERO
            };
            let reply = if state.mute {
                None
            } else if let Some(injected) = state.injected.take() {
                Some(injected)
            } else {
                Some(respond(&mut state, &line, is_owner))
            };
            (reply, delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(reply) = reply {
            if write_half.write_all(&reply).await.is_err() {
                break;
            }
        }
    }

    if is_owner {
        state.lock().unwrap().owner_connected = false;
    }
}

fn respond(state: &mut InstrumentState, line: &str, is_owner: bool) -> Vec<u8> {
    let may_write = is_owner && !state.deny_writes;

    if line == "get_status" {
        let mode = if is_owner { "owner" } else { "read_only" };
        return format!("status:{}\n", mode).into_bytes();
    }
    if line == "get_exposure" {
        return format!("exposure:{}\n", state.exposure_ms).into_bytes();
    }
    if line == "get_calibration" {
        return calibration_reply(state);
    }
    if line == "take_spectrum" {
        return b"spectrum_complete\r\n".to_vec();
    }
    if line == "get_spectrum" {
        let mut frame = b"spectrum:".to_vec();
        for count in &state.readout {
            frame.extend_from_slice(&count.to_le_bytes());
        }
        frame.push(b'\n');
        return frame;
    }

    if let Some(value) = line.strip_prefix("set_exposure") {
        if !may_write {
            return b"denied:not owner\n".to_vec();
        }
        let Ok(requested) = value.parse::<u32>() else {
            return b"error\n".to_vec();
        };
        state.exposure_ms = requested.min(MAX_EXPOSURE_MS);
        return format!("exposure:{}\n", state.exposure_ms).into_bytes();
    }
    if let Some(value) = line.strip_prefix("set_cal") {
        if !may_write {
            return b"denied\n".to_vec();
        }
        let parsed: Result<Vec<f64>, _> = value.split(',').map(str::parse::<f64>).collect();
        match parsed {
            Ok(values) if values.len() == 4 => {
                state.calibration = [values[0], values[1], values[2], values[3]];
                state.calibration_available = true;
                return calibration_reply(state);
            }
            _ => return b"error\n".to_vec(),
        }
    }
    if let Some(value) = line.strip_prefix("set_wifi") {
        if !may_write {
            return b"denied\n".to_vec();
        }
        let ssid = value.split(',').next().unwrap_or_default();
        return format!("wifi:{}\n", ssid).into_bytes();
    }

    b"unknown command\n".to_vec()
}

fn calibration_reply(state: &InstrumentState) -> Vec<u8> {
    if !state.calibration_available {
        return b"calibration:unset\n".to_vec();
    }
    let [c1, c2, c3, c4] = state.calibration;
    format!("calibration:{},{},{},{}\n", c1, c2, c3, c4).into_bytes()
}
