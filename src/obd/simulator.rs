// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! In-process ELM327 simulator for demo and testing

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::prelude::*;
use rand_distr::Normal;
use std::collections::HashSet;
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::pid::Pid;
use super::{ObdError, ObdTransport};

const SIM_VIN: &str = "1HGCM82633A004352";
const STEP_SECONDS: f64 = 5.0;

/// Knobs shared by every transport a factory hands out
#[derive(Debug, Default)]
pub struct SimulatorControl {
    /// Number of `open` calls seen so far
    pub open_attempts: AtomicU32,
    /// Remaining `open` calls that should fail
    pub fail_opens: AtomicU32,
    /// Ignition off: the adapter answers but the vehicle does not
    pub vehicle_offline: AtomicBool,
    unavailable: Mutex<HashSet<Pid>>,
    stored_dtcs: Mutex<Vec<String>>,
    start_distance: Mutex<Option<f64>>,
}

impl SimulatorControl {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self {
            stored_dtcs: Mutex::new(vec!["P0133".to_string(), "P0420".to_string()]),
            ..Self::default()
        })
    }

    /// Make a signal answer `NO DATA`
    pub fn set_unavailable(&self, pid: Pid) {
        self.unavailable.lock().insert(pid);
    }

    pub fn set_dtcs(&self, codes: &[&str]) {
        *self.stored_dtcs.lock() = codes.iter().map(|c| c.to_string()).collect();
    }

    pub fn dtcs(&self) -> Vec<String> {
        self.stored_dtcs.lock().clone()
    }

    /// Odometer (distance since DTC clear) the next simulated vehicle starts at
    pub fn set_start_distance(&self, km: f64) {
        *self.start_distance.lock() = Some(km);
    }
}

/// Simulated drive cycle
struct VehicleModel {
    rng: StdRng,
    t: f64,
    rpm: f64,
    speed: f64,
    load: f64,
    throttle: f64,
    coolant: f64,
    oil: f64,
    intake: f64,
    fuel: f64,
    runtime: f64,
    distance: f64,
}

impl VehicleModel {
    fn new(start_distance: f64) -> Self {
        Self {
            rng: StdRng::from_entropy(),
            t: 0.0,
            rpm: 800.0,
            speed: 0.0,
            load: 20.0,
            throttle: 12.0,
            coolant: 40.0,
            oil: 35.0,
            intake: 25.0,
            fuel: 72.0,
            runtime: 0.0,
            distance: start_distance,
        }
    }

    fn noise(&mut self, sigma: f64) -> f64 {
        match Normal::new(0.0, sigma) {
            Ok(dist) => self.rng.sample(dist),
            Err(_) => 0.0,
        }
    }

    fn advance(&mut self) {
        self.t += STEP_SECONDS;

        // Slow stop-and-go cycle around a cruising speed
        let phase = (2.0 * PI * self.t / 600.0).sin();
        let target_speed = (55.0 + 45.0 * phase).max(0.0);
        self.speed = (self.speed + 0.4 * (target_speed - self.speed) + self.noise(2.0)).clamp(0.0, 200.0);

        self.rpm = (800.0 + self.speed * 28.0 + self.noise(60.0)).clamp(600.0, 6500.0);
        self.throttle = (10.0 + self.speed * 0.35 + self.noise(1.5)).clamp(0.0, 100.0);
        self.load = (18.0 + self.throttle * 0.8 + self.noise(2.0)).clamp(0.0, 100.0);

        self.coolant += (90.0 - self.coolant) * 0.05 + self.noise(0.2);
        self.oil += (self.coolant - 5.0 - self.oil) * 0.03 + self.noise(0.2);
        self.intake = 25.0 + self.speed * 0.02 + self.noise(0.5);

        self.fuel = (self.fuel - 0.002 * self.load / 10.0).max(0.0);
        self.runtime += STEP_SECONDS;
        self.distance += self.speed * STEP_SECONDS / 3600.0;
    }

    fn value(&mut self, pid: Pid) -> f64 {
        match pid {
            Pid::Rpm => self.rpm,
            Pid::Speed => self.speed,
            Pid::EngineLoad => self.load,
            Pid::CoolantTemp => self.coolant,
            Pid::IntakeTemp => self.intake,
            Pid::FuelLevel => self.fuel,
            Pid::ThrottlePosition => self.throttle,
            Pid::Maf => self.rpm * self.load / 4000.0,
            Pid::FuelPressure => 350.0 + self.noise(5.0),
            Pid::EngineOilTemp => self.oil,
            Pid::EngineRuntime => self.runtime,
            Pid::DistanceWithMil => 0.0,
            Pid::DistanceSinceDtcClear => self.distance,
        }
    }
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Encode a trouble code such as `P0133` into its two-byte form
fn encode_dtc(code: &str) -> Option<[u8; 2]> {
    let mut chars = code.chars();
    let system = match chars.next()? {
        'P' => 0u8,
        'C' => 1,
        'B' => 2,
        'U' => 3,
        _ => return None,
    };
    let rest: String = chars.collect();
    if rest.len() != 4 {
        return None;
    }
    let first = rest[..1].parse::<u8>().ok()?;
    let second = u8::from_str_radix(&rest[1..2], 16).ok()?;
    let low = u8::from_str_radix(&rest[2..], 16).ok()?;
    Some([(system << 6) | ((first & 0x03) << 4) | second, low])
}

/// Transport that answers like an ELM327 attached to a running car
pub struct SimulatedTransport {
    control: Arc<SimulatorControl>,
    vehicle: VehicleModel,
    open: bool,
}

impl SimulatedTransport {
    pub fn new(control: Arc<SimulatorControl>) -> Self {
        let start = control.start_distance.lock().unwrap_or(4800.0);
        Self {
            control,
            vehicle: VehicleModel::new(start),
            open: false,
        }
    }

    fn respond(&mut self, command: &str) -> String {
        let command = command.trim().to_ascii_uppercase();

        if command.starts_with("AT") {
            return match command.as_str() {
                "ATZ" | "ATI" => "ELM327 v1.5".to_string(),
                "ATRV" => "12.6V".to_string(),
                "ATDP" => "AUTO, ISO 15765-4 (CAN 11/500)".to_string(),
                _ => "OK".to_string(),
            };
        }

        if self.control.vehicle_offline.load(Ordering::SeqCst) {
            return "SEARCHING...\rUNABLE TO CONNECT".to_string();
        }

        match command.as_str() {
            "0100" => "41 00 BE 3F A8 13".to_string(),
            "0902" => {
                let mut bytes = vec![0x49, 0x02, 0x01];
                bytes.extend(SIM_VIN.bytes());
                hex_bytes(&bytes)
            }
            "03" => {
                let mut bytes = vec![0x43];
                for code in self.control.stored_dtcs.lock().iter() {
                    if let Some(pair) = encode_dtc(code) {
                        bytes.extend_from_slice(&pair);
                    }
                }
                while (bytes.len() - 1) % 6 != 0 || bytes.len() == 1 {
                    bytes.push(0x00);
                }
                hex_bytes(&bytes)
            }
            "04" => {
                self.control.stored_dtcs.lock().clear();
                "44".to_string()
            }
            _ => self.respond_mode01(&command),
        }
    }

    fn respond_mode01(&mut self, command: &str) -> String {
        let pid = command
            .strip_prefix("01")
            .filter(|code| code.len() == 2)
            .and_then(|code| u8::from_str_radix(code, 16).ok())
            .and_then(Pid::from_code);

        let Some(pid) = pid else {
            return "?".to_string();
        };

        if self.control.unavailable.lock().contains(&pid) {
            return "NO DATA".to_string();
        }

        if pid == Pid::Rpm {
            self.vehicle.advance();
        }

        let mut bytes = vec![0x41, pid.code()];
        bytes.extend(pid.encode(self.vehicle.value(pid)));
        hex_bytes(&bytes)
    }
}

#[async_trait]
impl ObdTransport for SimulatedTransport {
    fn describe(&self) -> String {
        "simulator://elm327".to_string()
    }

    async fn open(&mut self, _timeout: Duration) -> Result<(), ObdError> {
        self.control.open_attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .control
            .fail_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ObdError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "simulated adapter unavailable",
            )));
        }

        self.open = true;
        Ok(())
    }

    async fn close(&mut self) {
        self.open = false;
    }

    async fn send_command(&mut self, command: &str, _timeout: Duration) -> Result<String, ObdError> {
        if !self.open {
            return Err(ObdError::NotOpen);
        }
        Ok(format!("{}\r\r", self.respond(command)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_dtc() {
        assert_eq!(encode_dtc("P0133"), Some([0x01, 0x33]));
        assert_eq!(encode_dtc("C1234"), Some([0x52, 0x34]));
        assert_eq!(encode_dtc("U0100"), Some([0xC1, 0x00]));
        assert_eq!(encode_dtc("X0000"), None);
    }

    #[tokio::test]
    async fn test_fail_opens_counts_down() {
        let control = SimulatorControl::shared();
        control.fail_opens.store(1, Ordering::SeqCst);

        let mut first = SimulatedTransport::new(control.clone());
        assert!(first.open(Duration::from_secs(1)).await.is_err());
        let mut second = SimulatedTransport::new(control.clone());
        assert!(second.open(Duration::from_secs(1)).await.is_ok());
        assert_eq!(control.open_attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_answers_mode01() {
        let control = SimulatorControl::shared();
        control.set_unavailable(Pid::FuelPressure);
        let mut sim = SimulatedTransport::new(control);
        sim.open(Duration::from_secs(1)).await.unwrap();

        let rpm = sim.send_command("010C", Duration::from_secs(1)).await.unwrap();
        assert!(rpm.starts_with("41 0C"));
        let fuel = sim.send_command("010A", Duration::from_secs(1)).await.unwrap();
        assert!(fuel.contains("NO DATA"));
        let unknown = sim.send_command("01FF", Duration::from_secs(1)).await.unwrap();
        assert!(unknown.contains('?'));
    }
}
