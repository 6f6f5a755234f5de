// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! Mode 01 parameter IDs tracked by the collector

use serde::{Deserialize, Serialize};

/// Tracked OBD-II signals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pid {
    Rpm,
    Speed,
    EngineLoad,
    CoolantTemp,
    IntakeTemp,
    FuelLevel,
    ThrottlePosition,
    Maf,
    FuelPressure,
    EngineOilTemp,
    EngineRuntime,
    DistanceWithMil,
    DistanceSinceDtcClear,
}

impl Pid {
    pub const ALL: [Pid; 13] = [
        Pid::Rpm,
        Pid::Speed,
        Pid::EngineLoad,
        Pid::CoolantTemp,
        Pid::IntakeTemp,
        Pid::FuelLevel,
        Pid::ThrottlePosition,
        Pid::Maf,
        Pid::FuelPressure,
        Pid::EngineOilTemp,
        Pid::EngineRuntime,
        Pid::DistanceWithMil,
        Pid::DistanceSinceDtcClear,
    ];

    /// PID byte in service 01
    pub fn code(self) -> u8 {
        match self {
            Self::Rpm => 0x0C,
            Self::Speed => 0x0D,
            Self::EngineLoad => 0x04,
            Self::CoolantTemp => 0x05,
            Self::IntakeTemp => 0x0F,
            Self::FuelLevel => 0x2F,
            Self::ThrottlePosition => 0x11,
            Self::Maf => 0x10,
            Self::FuelPressure => 0x0A,
            Self::EngineOilTemp => 0x5C,
            Self::EngineRuntime => 0x1F,
            Self::DistanceWithMil => 0x21,
            Self::DistanceSinceDtcClear => 0x31,
        }
    }

    /// Column / field name in stored readings
    pub fn field(self) -> &'static str {
        match self {
            Self::Rpm => "rpm",
            Self::Speed => "speed",
            Self::EngineLoad => "engine_load",
            Self::CoolantTemp => "coolant_temp",
            Self::IntakeTemp => "intake_temp",
            Self::FuelLevel => "fuel_level",
            Self::ThrottlePosition => "throttle_position",
            Self::Maf => "maf",
            Self::FuelPressure => "fuel_pressure",
            Self::EngineOilTemp => "engine_oil_temp",
            Self::EngineRuntime => "engine_runtime",
            Self::DistanceWithMil => "distance_w_mil",
            Self::DistanceSinceDtcClear => "distance_since_dtc_clear",
        }
    }

    /// Conventional command name, as used in `obd.supported_commands`
    pub fn command_name(self) -> &'static str {
        match self {
            Self::Rpm => "RPM",
            Self::Speed => "SPEED",
            Self::EngineLoad => "ENGINE_LOAD",
            Self::CoolantTemp => "COOLANT_TEMP",
            Self::IntakeTemp => "INTAKE_TEMP",
            Self::FuelLevel => "FUEL_LEVEL",
            Self::ThrottlePosition => "THROTTLE_POS",
            Self::Maf => "MAF",
            Self::FuelPressure => "FUEL_PRESSURE",
            Self::EngineOilTemp => "OIL_TEMP",
            Self::EngineRuntime => "RUN_TIME",
            Self::DistanceWithMil => "DISTANCE_W_MIL",
            Self::DistanceSinceDtcClear => "DISTANCE_SINCE_DTC_CLEAR",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Self::Rpm => "rpm",
            Self::Speed => "km/h",
            Self::EngineLoad | Self::FuelLevel | Self::ThrottlePosition => "%",
            Self::CoolantTemp | Self::IntakeTemp | Self::EngineOilTemp => "°C",
            Self::Maf => "g/s",
            Self::FuelPressure => "kPa",
            Self::EngineRuntime => "s",
            Self::DistanceWithMil | Self::DistanceSinceDtcClear => "km",
        }
    }

    /// Resolve a command or field name, case-insensitively
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|pid| {
            pid.command_name().eq_ignore_ascii_case(name) || pid.field().eq_ignore_ascii_case(name)
        })
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|pid| pid.code() == code)
    }

    /// Number of data bytes in the response
    pub fn data_len(self) -> usize {
        match self {
            Self::Rpm
            | Self::Maf
            | Self::EngineRuntime
            | Self::DistanceWithMil
            | Self::DistanceSinceDtcClear => 2,
            _ => 1,
        }
    }

    /// Decode the data bytes following the PID in a `41 xx` response
    pub fn decode(self, data: &[u8]) -> Option<f64> {
        if data.len() < self.data_len() {
            return None;
        }
        let a = data[0] as f64;
        let word = || (data[0] as f64) * 256.0 + data[1] as f64;

        let value = match self {
            Self::Rpm => word() / 4.0,
            Self::Speed => a,
            Self::EngineLoad | Self::FuelLevel | Self::ThrottlePosition => a * 100.0 / 255.0,
            Self::CoolantTemp | Self::IntakeTemp | Self::EngineOilTemp => a - 40.0,
            Self::Maf => word() / 100.0,
            Self::FuelPressure => a * 3.0,
            Self::EngineRuntime | Self::DistanceWithMil | Self::DistanceSinceDtcClear => word(),
        };
        Some(value)
    }

    /// Inverse of [`Pid::decode`], clamped to the representable range
    pub fn encode(self, value: f64) -> Vec<u8> {
        let byte = |v: f64| v.round().clamp(0.0, 255.0) as u8;
        let word = |v: f64| {
            let raw = v.round().clamp(0.0, 65535.0) as u16;
            vec![(raw >> 8) as u8, (raw & 0xFF) as u8]
        };

        match self {
            Self::Rpm => word(value * 4.0),
            Self::Speed => vec![byte(value)],
            Self::EngineLoad | Self::FuelLevel | Self::ThrottlePosition => {
                vec![byte(value * 255.0 / 100.0)]
            }
            Self::CoolantTemp | Self::IntakeTemp | Self::EngineOilTemp => vec![byte(value + 40.0)],
            Self::Maf => word(value * 100.0),
            Self::FuelPressure => vec![byte(value / 3.0)],
            Self::EngineRuntime | Self::DistanceWithMil | Self::DistanceSinceDtcClear => word(value),
        }
    }
}

impl std::fmt::Display for Pid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.command_name())
    }
}

/// One value per tracked signal; `None` means the adapter did not answer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorValues {
    pub rpm: Option<f64>,
    pub speed: Option<f64>,
    pub engine_load: Option<f64>,
    pub coolant_temp: Option<f64>,
    pub intake_temp: Option<f64>,
    pub fuel_level: Option<f64>,
    pub throttle_position: Option<f64>,
    pub maf: Option<f64>,
    pub fuel_pressure: Option<f64>,
    pub engine_oil_temp: Option<f64>,
    pub engine_runtime: Option<f64>,
    pub distance_w_mil: Option<f64>,
    pub distance_since_dtc_clear: Option<f64>,
}

impl SensorValues {
    pub fn get(&self, pid: Pid) -> Option<f64> {
        match pid {
            Pid::Rpm => self.rpm,
            Pid::Speed => self.speed,
            Pid::EngineLoad => self.engine_load,
            Pid::CoolantTemp => self.coolant_temp,
            Pid::IntakeTemp => self.intake_temp,
            Pid::FuelLevel => self.fuel_level,
            Pid::ThrottlePosition => self.throttle_position,
            Pid::Maf => self.maf,
            Pid::FuelPressure => self.fuel_pressure,
            Pid::EngineOilTemp => self.engine_oil_temp,
            Pid::EngineRuntime => self.engine_runtime,
            Pid::DistanceWithMil => self.distance_w_mil,
            Pid::DistanceSinceDtcClear => self.distance_since_dtc_clear,
        }
    }

    pub fn set(&mut self, pid: Pid, value: Option<f64>) {
        let slot = match pid {
            Pid::Rpm => &mut self.rpm,
            Pid::Speed => &mut self.speed,
            Pid::EngineLoad => &mut self.engine_load,
            Pid::CoolantTemp => &mut self.coolant_temp,
            Pid::IntakeTemp => &mut self.intake_temp,
            Pid::FuelLevel => &mut self.fuel_level,
            Pid::ThrottlePosition => &mut self.throttle_position,
            Pid::Maf => &mut self.maf,
            Pid::FuelPressure => &mut self.fuel_pressure,
            Pid::EngineOilTemp => &mut self.engine_oil_temp,
            Pid::EngineRuntime => &mut self.engine_runtime,
            Pid::DistanceWithMil => &mut self.distance_w_mil,
            Pid::DistanceSinceDtcClear => &mut self.distance_since_dtc_clear,
        };
        *slot = value;
    }

    /// Number of signals with a value
    pub fn present(&self) -> usize {
        Pid::ALL.iter().filter(|pid| self.get(**pid).is_some()).count()
    }
}
