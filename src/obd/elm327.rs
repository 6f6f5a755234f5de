// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! ELM327 command layer

use std::time::Duration;
use tracing::{debug, trace};

use super::pid::Pid;
use super::{ObdError, ObdTransport};

/// Reset, echo off, linefeeds off, spaces on, headers off, automatic protocol
const INIT_COMMANDS: &[&str] = &["ATZ", "ATE0", "ATL0", "ATS1", "ATH0", "ATSP0"];

const NO_DATA_MARKERS: &[&str] = &[
    "NO DATA",
    "UNABLE TO CONNECT",
    "STOPPED",
    "CAN ERROR",
    "BUS INIT",
    "BUS ERROR",
];

/// Split a raw response into per-line byte vectors, dropping status text and
/// CAN frame prefixes such as `0:` or the `014` length line
pub fn response_lines(raw: &str) -> Vec<Vec<u8>> {
    raw.split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("SEARCHING"))
        .filter_map(|line| {
            let mut bytes = Vec::new();
            for token in line.split_whitespace() {
                if token.ends_with(':') {
                    continue;
                }
                if token.len() % 2 != 0 || !token.chars().all(|c| c.is_ascii_hexdigit()) {
                    if line.split_whitespace().count() == 1 {
                        // lone length header, e.g. "014"
                        return None;
                    }
                    continue;
                }
                for i in (0..token.len()).step_by(2) {
                    if let Ok(b) = u8::from_str_radix(&token[i..i + 2], 16) {
                        bytes.push(b);
                    }
                }
            }
            (!bytes.is_empty()).then_some(bytes)
        })
        .collect()
}

fn is_no_data(raw: &str) -> bool {
    let upper = raw.to_ascii_uppercase();
    NO_DATA_MARKERS.iter().any(|m| upper.contains(m))
}

/// Find `41 <pid>` in the response and decode the value that follows
pub fn decode_mode01(lines: &[Vec<u8>], pid: Pid) -> Option<f64> {
    lines.iter().find_map(|bytes| {
        bytes
            .windows(2)
            .position(|w| w[0] == 0x41 && w[1] == pid.code())
            .and_then(|pos| pid.decode(&bytes[pos + 2..]))
    })
}

/// Extract a VIN from a service 09 PID 02 response.
///
/// Tolerates both the CAN multi-frame layout and the legacy one where every
/// line repeats `49 02 nn`: VINs never contain `I`, `O` or `Q`, so the `0x49`
/// markers fall out together with the non-printable bytes.
pub fn decode_vin(lines: &[Vec<u8>]) -> Option<String> {
    let flat: Vec<u8> = lines.concat();
    let start = flat.windows(2).position(|w| w == [0x49, 0x02])?;

    let vin: String = flat[start + 2..]
        .iter()
        .map(|b| *b as char)
        .filter(|c| c.is_ascii_alphanumeric() && !matches!(c, 'I' | 'O' | 'Q'))
        .collect();

    if vin.len() < 17 {
        return None;
    }
    Some(vin[vin.len() - 17..].to_string())
}

fn format_dtc(a: u8, b: u8) -> String {
    let system = match a >> 6 {
        0 => 'P',
        1 => 'C',
        2 => 'B',
        _ => 'U',
    };
    format!("{}{}{:X}{:02X}", system, (a >> 4) & 0x03, a & 0x0F, b)
}

/// Decode service 03 trouble codes
pub fn decode_dtcs(lines: &[Vec<u8>]) -> Vec<String> {
    let mut codes = Vec::new();

    for bytes in lines {
        let Some((&0x43, mut rest)) = bytes.split_first() else {
            continue;
        };
        // CAN responses carry a count byte before the pairs
        if rest.len() % 2 == 1 {
            rest = &rest[1..];
        }
        for pair in rest.chunks_exact(2) {
            if pair[0] == 0 && pair[1] == 0 {
                continue;
            }
            let code = format_dtc(pair[0], pair[1]);
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
    }

    codes
}

/// An initialised ELM327 on top of a transport
pub struct Elm327 {
    transport: Box<dyn ObdTransport>,
    timeout: Duration,
}

impl Elm327 {
    /// Open the transport and run the initialisation sequence
    pub async fn open(mut transport: Box<dyn ObdTransport>, timeout: Duration) -> Result<Self, ObdError> {
        transport.open(timeout).await?;
        let mut elm = Self { transport, timeout };

        if let Err(e) = elm.initialize().await {
            elm.close().await;
            return Err(e);
        }
        Ok(elm)
    }

    async fn initialize(&mut self) -> Result<(), ObdError> {
        for command in INIT_COMMANDS {
            let reply = self.command(command).await?;
            if reply.contains('?') {
                return Err(ObdError::Rejected(command.to_string()));
            }
        }
        debug!("ELM327 initialised on {}", self.transport.describe());
        Ok(())
    }

    pub fn describe(&self) -> String {
        self.transport.describe()
    }

    /// Send one command and return the raw response text
    pub async fn command(&mut self, command: &str) -> Result<String, ObdError> {
        let reply = self.transport.send_command(command, self.timeout).await?;
        trace!(command, reply = %reply.escape_debug(), "elm327");
        Ok(reply)
    }

    /// Whether the vehicle ECU answers the supported-PIDs probe
    pub async fn vehicle_responding(&mut self) -> Result<bool, ObdError> {
        let reply = self.command("0100").await?;
        if is_no_data(&reply) {
            return Ok(false);
        }
        let lines = response_lines(&reply);
        Ok(lines
            .iter()
            .any(|bytes| bytes.windows(2).any(|w| w == [0x41, 0x00])))
    }

    /// Query one signal; `Ok(None)` when the vehicle has no data for it
    pub async fn query(&mut self, pid: Pid) -> Result<Option<f64>, ObdError> {
        let command = format!("01{:02X}", pid.code());
        let reply = self.command(&command).await?;

        if is_no_data(&reply) {
            return Ok(None);
        }
        if reply.trim() == "?" {
            return Err(ObdError::Rejected(command));
        }

        match decode_mode01(&response_lines(&reply), pid) {
            Some(value) => Ok(Some(value)),
            None => Err(ObdError::BadResponse {
                command,
                response: reply,
            }),
        }
    }

    pub async fn read_vin(&mut self) -> Result<Option<String>, ObdError> {
        let reply = self.command("0902").await?;
        if is_no_data(&reply) {
            return Ok(None);
        }
        Ok(decode_vin(&response_lines(&reply)))
    }

    pub async fn read_dtcs(&mut self) -> Result<Vec<String>, ObdError> {
        let reply = self.command("03").await?;
        if is_no_data(&reply) {
            return Ok(Vec::new());
        }
        Ok(decode_dtcs(&response_lines(&reply)))
    }

    pub async fn clear_dtcs(&mut self) -> Result<bool, ObdError> {
        let reply = self.command("04").await?;
        Ok(response_lines(&reply)
            .iter()
            .any(|bytes| bytes.first() == Some(&0x44)))
    }

    pub async fn close(mut self) {
        self.transport.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obd::{SimulatedTransport, SimulatorControl};
    use std::sync::atomic::Ordering;

    #[test]
    fn test_response_lines_single_frame() {
        let lines = response_lines("SEARCHING...\r41 0C 1A F8\r\r");
        assert_eq!(lines, vec![vec![0x41, 0x0C, 0x1A, 0xF8]]);
        assert_eq!(decode_mode01(&lines, Pid::Rpm), Some(1726.0));
    }

    #[test]
    fn test_response_lines_without_spaces() {
        let lines = response_lines("410D3C\r");
        assert_eq!(decode_mode01(&lines, Pid::Speed), Some(60.0));
    }

    #[test]
    fn test_decode_mode01_wrong_pid() {
        let lines = response_lines("41 0D 3C");
        assert_eq!(decode_mode01(&lines, Pid::Rpm), None);
    }

    #[test]
    fn test_decode_vin_can_multiframe() {
        let raw = "014\r0: 49 02 01 31 48 47\r1: 43 4D 38 32 36 33 33\r2: 41 30 30 34 33 35 32\r";
        let vin = decode_vin(&response_lines(raw));
        assert_eq!(vin.as_deref(), Some("1HGCM82633A004352"));
    }

    #[test]
    fn test_decode_vin_legacy_lines() {
        let raw = "49 02 01 00 00 00 31\r49 02 02 48 47 43 4D\r49 02 03 38 32 36 33\r49 02 04 33 41 30 30\r49 02 05 34 33 35 32";
        let vin = decode_vin(&response_lines(raw));
        assert_eq!(vin.as_deref(), Some("1HGCM82633A004352"));
    }

    #[test]
    fn test_decode_vin_too_short() {
        assert_eq!(decode_vin(&response_lines("49 02 01 31 32")), None);
    }

    #[test]
    fn test_decode_dtcs() {
        let codes = decode_dtcs(&response_lines("43 01 33 04 20 00 00"));
        assert_eq!(codes, vec!["P0133".to_string(), "P0420".to_string()]);

        // CAN form with count byte
        let codes = decode_dtcs(&response_lines("43 01 C1 00"));
        assert_eq!(codes, vec!["U0100".to_string()]);

        assert!(decode_dtcs(&response_lines("43 00 00 00 00 00 00")).is_empty());
    }

    #[tokio::test]
    async fn test_elm327_against_simulator() {
        let control = SimulatorControl::shared();
        control.set_unavailable(Pid::Maf);
        let transport = Box::new(SimulatedTransport::new(control.clone()));
        let mut elm = Elm327::open(transport, Duration::from_secs(1)).await.unwrap();

        assert!(elm.vehicle_responding().await.unwrap());
        assert!(elm.query(Pid::Rpm).await.unwrap().is_some());
        assert_eq!(elm.query(Pid::Maf).await.unwrap(), None);
        assert_eq!(elm.read_vin().await.unwrap().as_deref(), Some("1HGCM82633A004352"));
        assert_eq!(elm.read_dtcs().await.unwrap(), vec!["P0133", "P0420"]);
        assert!(elm.clear_dtcs().await.unwrap());
        assert!(elm.read_dtcs().await.unwrap().is_empty());

        control.vehicle_offline.store(true, Ordering::SeqCst);
        assert!(!elm.vehicle_responding().await.unwrap());
        elm.close().await;
    }
}
