// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! OBD connection adapter - lifecycle, retries and serialized access

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::elm327::Elm327;
use super::pid::{Pid, SensorValues};
use super::transport::{transport_for, ObdTransport};
use super::ObdError;
use crate::config::ObdSettings;

/// Builds a fresh transport for every connection attempt
pub type TransportFactory = Arc<dyn Fn() -> Result<Box<dyn ObdTransport>, ObdError> + Send + Sync>;

/// Adapter operational status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Point-in-time values of every tracked signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub timestamp: DateTime<Utc>,
    pub sensors: SensorValues,
}

/// What the adapter knows about the vehicle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleMetadata {
    pub vin: Option<String>,
    pub adapter: String,
    pub supported_commands: Vec<String>,
}

/// Single owner of the adapter handle.
///
/// Every transition and query goes through one async mutex; the state is
/// mirrored in a separate lock so status checks never wait on a query.
pub struct ObdConnection {
    settings: ObdSettings,
    factory: TransportFactory,
    tracked: Vec<Pid>,
    adapter: Mutex<Option<Elm327>>,
    state: RwLock<ConnectionState>,
}

impl ObdConnection {
    /// Adapter reached through the transport described by `settings`
    pub fn new(settings: ObdSettings) -> Self {
        let transport_settings = settings.clone();
        let factory: TransportFactory = Arc::new(move || transport_for(&transport_settings));
        Self::with_transport_factory(settings, factory)
    }

    pub fn with_transport_factory(settings: ObdSettings, factory: TransportFactory) -> Self {
        let tracked = tracked_pids(&settings.supported_commands);
        Self {
            settings,
            factory,
            tracked,
            adapter: Mutex::new(None),
            state: RwLock::new(ConnectionState::Disconnected),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Signals polled by [`ObdConnection::get_current_data`]
    pub fn tracked(&self) -> &[Pid] {
        &self.tracked
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    /// Connect with up to `retry_attempts` tries and a fixed pause between
    /// them. Returns `true` once connected.
    pub async fn connect(&self) -> bool {
        let mut adapter = self.adapter.lock().await;
        if adapter.is_some() && self.is_connected() {
            return true;
        }

        self.set_state(ConnectionState::Connecting);
        let attempts = self.settings.retry_attempts.max(1);

        for attempt in 1..=attempts {
            info!(attempt, attempts, "Connecting to OBD adapter");

            match self.open_adapter().await {
                Ok(elm) => {
                    info!("Connected to vehicle via {}", elm.describe());
                    *adapter = Some(elm);
                    self.set_state(ConnectionState::Connected);
                    return true;
                }
                Err(e) => warn!(attempt, error = %e, "Connection attempt failed"),
            }

            if attempt < attempts {
                tokio::time::sleep(self.settings.retry_backoff()).await;
            }
        }

        self.set_state(ConnectionState::Disconnected);
        error!("Failed to connect to OBD adapter after {} attempts", attempts);
        false
    }

    async fn open_adapter(&self) -> Result<Elm327, ObdError> {
        let transport = (self.factory)()?;
        let mut elm = Elm327::open(transport, self.settings.timeout()).await?;

        match elm.vehicle_responding().await {
            Ok(true) => Ok(elm),
            Ok(false) => {
                let adapter = elm.describe();
                elm.close().await;
                Err(ObdError::VehicleUnavailable(adapter))
            }
            Err(e) => {
                elm.close().await;
                Err(e)
            }
        }
    }

    /// Release the adapter. Safe to call in any state.
    pub async fn disconnect(&self) {
        let mut adapter = self.adapter.lock().await;
        if let Some(elm) = adapter.take() {
            elm.close().await;
            info!("Disconnected from OBD adapter");
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Query every tracked signal. `None` when not connected; a signal that
    /// fails to answer is recorded as missing.
    pub async fn get_current_data(&self) -> Option<SensorSnapshot> {
        let mut adapter = self.adapter.lock().await;
        if !self.is_connected() {
            return None;
        }
        let elm = adapter.as_mut()?;

        let mut sensors = SensorValues::default();
        for pid in &self.tracked {
            match elm.query(*pid).await {
                Ok(value) => sensors.set(*pid, value),
                Err(e) => debug!(pid = %pid, error = %e, "Query failed"),
            }
        }

        Some(SensorSnapshot {
            timestamp: Utc::now(),
            sensors,
        })
    }

    /// VIN and adapter details. `None` when not connected.
    pub async fn get_vehicle_info(&self) -> Option<VehicleMetadata> {
        let mut adapter = self.adapter.lock().await;
        if !self.is_connected() {
            return None;
        }
        let elm = adapter.as_mut()?;

        let vin = match elm.read_vin().await {
            Ok(vin) => vin,
            Err(e) => {
                debug!(error = %e, "VIN query failed");
                None
            }
        };

        Some(VehicleMetadata {
            vin,
            adapter: elm.describe(),
            supported_commands: self
                .tracked
                .iter()
                .map(|p| p.command_name().to_string())
                .collect(),
        })
    }

    /// Stored diagnostic trouble codes
    pub async fn get_dtc_codes(&self) -> Result<Vec<String>, ObdError> {
        let mut adapter = self.adapter.lock().await;
        match adapter.as_mut() {
            Some(elm) if self.is_connected() => elm.read_dtcs().await,
            _ => Err(ObdError::NotConnected),
        }
    }

    /// Clear stored trouble codes and the MIL
    pub async fn clear_dtc_codes(&self) -> Result<bool, ObdError> {
        let mut adapter = self.adapter.lock().await;
        match adapter.as_mut() {
            Some(elm) if self.is_connected() => {
                let cleared = elm.clear_dtcs().await?;
                if cleared {
                    info!("Cleared diagnostic trouble codes");
                }
                Ok(cleared)
            }
            _ => Err(ObdError::NotConnected),
        }
    }

    /// Whether the engine answers an RPM query right now
    pub async fn test_connection(&self) -> bool {
        let mut adapter = self.adapter.lock().await;
        match adapter.as_mut() {
            Some(elm) if self.is_connected() => matches!(elm.query(Pid::Rpm).await, Ok(Some(_))),
            _ => false,
        }
    }
}

fn tracked_pids(commands: &[String]) -> Vec<Pid> {
    if commands.is_empty() {
        return Pid::ALL.to_vec();
    }

    let mut pids = Vec::new();
    for name in commands {
        match Pid::from_name(name) {
            Some(pid) if !pids.contains(&pid) => pids.push(pid),
            Some(_) => {}
            None => warn!("Ignoring unsupported OBD command '{}'", name),
        }
    }
    pids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionType;
    use crate::obd::{SimulatedTransport, SimulatorControl};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn simulated(control: Arc<SimulatorControl>, retry_attempts: u32) -> ObdConnection {
        let settings = ObdSettings {
            connection_type: ConnectionType::Simulator,
            retry_attempts,
            retry_backoff_secs: 0,
            ..ObdSettings::default()
        };
        let factory: TransportFactory = Arc::new(move || {
            Ok(Box::new(SimulatedTransport::new(control.clone())) as Box<dyn ObdTransport>)
        });
        ObdConnection::with_transport_factory(settings, factory)
    }

    #[tokio::test]
    async fn test_connect_and_query() {
        let control = SimulatorControl::shared();
        let conn = simulated(control, 3);

        assert!(conn.get_current_data().await.is_none());
        assert!(conn.connect().await);
        assert_eq!(conn.state(), ConnectionState::Connected);

        let snapshot = conn.get_current_data().await.unwrap();
        assert!(snapshot.sensors.rpm.is_some());
        assert!(snapshot.sensors.distance_since_dtc_clear.is_some());

        let info = conn.get_vehicle_info().await.unwrap();
        assert_eq!(info.vin.as_deref(), Some("1HGCM82633A004352"));
        assert_eq!(info.supported_commands.len(), 13);
    }

    #[tokio::test]
    async fn test_connect_retries_then_succeeds() {
        let control = SimulatorControl::shared();
        control.fail_opens.store(2, Ordering::SeqCst);
        let conn = simulated(control.clone(), 3);

        assert!(conn.connect().await);
        assert_eq!(control.open_attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_retries() {
        let control = SimulatorControl::shared();
        control.fail_opens.store(10, Ordering::SeqCst);
        let conn = simulated(control.clone(), 3);

        assert!(!conn.connect().await);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(control.open_attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_between_attempts() {
        let control = SimulatorControl::shared();
        control.fail_opens.store(10, Ordering::SeqCst);
        let settings = ObdSettings {
            retry_attempts: 3,
            retry_backoff_secs: 2,
            ..ObdSettings::default()
        };
        let factory_control = control.clone();
        let factory: TransportFactory = Arc::new(move || {
            Ok(Box::new(SimulatedTransport::new(factory_control.clone())) as Box<dyn ObdTransport>)
        });
        let conn = ObdConnection::with_transport_factory(settings, factory);

        let started = tokio::time::Instant::now();
        assert!(!conn.connect().await);
        // two pauses, none after the final attempt
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(4) && elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_vehicle_offline_is_not_connected() {
        let control = SimulatorControl::shared();
        control.vehicle_offline.store(true, Ordering::SeqCst);
        let conn = simulated(control, 2);
        assert!(!conn.connect().await);
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_missing_signal_is_none() {
        let control = SimulatorControl::shared();
        control.set_unavailable(Pid::FuelPressure);
        let conn = simulated(control, 1);
        assert!(conn.connect().await);

        let snapshot = conn.get_current_data().await.unwrap();
        assert!(snapshot.sensors.fuel_pressure.is_none());
        assert!(snapshot.sensors.speed.is_some());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let conn = simulated(SimulatorControl::shared(), 1);
        conn.disconnect().await;
        assert!(conn.connect().await);
        conn.disconnect().await;
        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.get_vehicle_info().await.is_none());
        assert!(matches!(conn.get_dtc_codes().await, Err(ObdError::NotConnected)));
    }

    #[tokio::test]
    async fn test_dtc_read_and_clear() {
        let control = SimulatorControl::shared();
        control.set_dtcs(&["P0301"]);
        let conn = simulated(control.clone(), 1);
        assert!(conn.connect().await);

        assert_eq!(conn.get_dtc_codes().await.unwrap(), vec!["P0301"]);
        assert!(conn.clear_dtc_codes().await.unwrap());
        assert!(control.dtcs().is_empty());
        assert!(conn.test_connection().await);
    }

    #[test]
    fn test_tracked_pids_from_commands() {
        let pids = tracked_pids(&["RPM".into(), "speed".into(), "RPM".into(), "BOOST".into()]);
        assert_eq!(pids, vec![Pid::Rpm, Pid::Speed]);
        assert_eq!(tracked_pids(&[]).len(), 13);
    }
}
