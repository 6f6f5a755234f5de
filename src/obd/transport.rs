// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/smartobd-rs

//! Byte transports to an ELM327 adapter

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::simulator::{SimulatedTransport, SimulatorControl};
use super::ObdError;
use crate::config::{ConnectionType, ObdSettings};

/// ELM327 command prompt
pub(crate) const PROMPT: u8 = b'>';

const DEFAULT_WIFI: &str = "192.168.0.10:35000";
const DEFAULT_USB: &str = "/dev/ttyUSB0";
const DEFAULT_BLUETOOTH: &str = "/dev/rfcomm0";

/// Raw command channel to an adapter
#[async_trait]
pub trait ObdTransport: Send {
    /// Human-readable endpoint description
    fn describe(&self) -> String;

    async fn open(&mut self, timeout: Duration) -> Result<(), ObdError>;

    async fn close(&mut self);

    /// Send one command line and return the text received before the prompt
    async fn send_command(&mut self, command: &str, timeout: Duration) -> Result<String, ObdError>;
}

/// Build the transport described by the adapter settings
pub fn transport_for(settings: &ObdSettings) -> Result<Box<dyn ObdTransport>, ObdError> {
    let port = settings.port.clone();

    match settings.connection_type {
        ConnectionType::Simulator => Ok(Box::new(SimulatedTransport::new(
            SimulatorControl::shared(),
        ))),
        ConnectionType::Wifi => Ok(Box::new(TcpTransport::new(
            port.unwrap_or_else(|| DEFAULT_WIFI.to_string()),
        ))),
        ConnectionType::Usb => serial_transport(
            port.unwrap_or_else(|| DEFAULT_USB.to_string()),
            settings.baud_rate,
        ),
        ConnectionType::Bluetooth => serial_transport(
            port.unwrap_or_else(|| DEFAULT_BLUETOOTH.to_string()),
            settings.baud_rate,
        ),
        ConnectionType::Auto => {
            if let Some(port) = port {
                return if port.contains(':') && !port.starts_with('/') {
                    Ok(Box::new(TcpTransport::new(port)))
                } else {
                    serial_transport(port, settings.baud_rate)
                };
            }
            match detect_serial_port() {
                Some(path) => {
                    info!("Auto-detected adapter on {}", path);
                    serial_transport(path, settings.baud_rate)
                }
                None => {
                    debug!("No serial adapter found, falling back to {}", DEFAULT_WIFI);
                    Ok(Box::new(TcpTransport::new(DEFAULT_WIFI.to_string())))
                }
            }
        }
    }
}

#[cfg(feature = "serial")]
fn serial_transport(path: String, baud_rate: u32) -> Result<Box<dyn ObdTransport>, ObdError> {
    Ok(Box::new(SerialTransport::new(path, baud_rate)))
}

#[cfg(not(feature = "serial"))]
fn serial_transport(path: String, _baud_rate: u32) -> Result<Box<dyn ObdTransport>, ObdError> {
    Err(ObdError::Unsupported(format!(
        "{} requires the `serial` feature",
        path
    )))
}

#[cfg(feature = "serial")]
fn detect_serial_port() -> Option<String> {
    match serialport::available_ports() {
        Ok(ports) => ports
            .into_iter()
            .map(|p| p.port_name)
            .find(|name| name.contains("USB") || name.contains("ACM") || name.contains("rfcomm")),
        Err(e) => {
            warn!("Serial port enumeration failed: {}", e);
            None
        }
    }
}

#[cfg(not(feature = "serial"))]
fn detect_serial_port() -> Option<String> {
    None
}

/// Read until the ELM327 prompt, returning the text before it
pub(crate) async fn read_until_prompt<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String, ObdError> {
    let mut buf = Vec::with_capacity(64);
    let mut chunk = [0u8; 256];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(ObdError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "adapter closed the connection",
            )));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.iter().position(|b| *b == PROMPT) {
            buf.truncate(pos);
            break;
        }
    }

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Wi-Fi adapters expose the ELM327 over a plain TCP socket
pub struct TcpTransport {
    addr: String,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(addr: String) -> Self {
        Self { addr, stream: None }
    }
}

#[async_trait]
impl ObdTransport for TcpTransport {
    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    async fn open(&mut self, timeout: Duration) -> Result<(), ObdError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| ObdError::Timeout(timeout))??;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        debug!("Opened {}", self.describe());
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }

    async fn send_command(&mut self, command: &str, timeout: Duration) -> Result<String, ObdError> {
        let stream = self.stream.as_mut().ok_or(ObdError::NotOpen)?;
        stream.write_all(format!("{}\r", command).as_bytes()).await?;

        tokio::time::timeout(timeout, read_until_prompt(stream))
            .await
            .map_err(|_| ObdError::Timeout(timeout))?
    }
}

/// USB and Bluetooth (rfcomm) adapters
#[cfg(feature = "serial")]
pub struct SerialTransport {
    path: String,
    baud_rate: u32,
    port: Option<Box<dyn serialport::SerialPort>>,
}

#[cfg(feature = "serial")]
impl SerialTransport {
    pub fn new(path: String, baud_rate: u32) -> Self {
        Self {
            path,
            baud_rate,
            port: None,
        }
    }
}

#[cfg(feature = "serial")]
fn join_error(e: tokio::task::JoinError) -> ObdError {
    ObdError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
}

#[cfg(feature = "serial")]
fn blocking_exchange(
    port: &mut dyn serialport::SerialPort,
    command: &str,
    timeout: Duration,
) -> Result<String, ObdError> {
    use std::io::{Read, Write};

    let deadline = std::time::Instant::now() + timeout;
    port.write_all(format!("{}\r", command).as_bytes())?;

    let mut buf = Vec::with_capacity(64);
    let mut chunk = [0u8; 256];
    loop {
        if std::time::Instant::now() >= deadline {
            return Err(ObdError::Timeout(timeout));
        }
        match port.read(&mut chunk) {
            Ok(0) => continue,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.iter().position(|b| *b == PROMPT) {
                    buf.truncate(pos);
                    return Ok(String::from_utf8_lossy(&buf).into_owned());
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

#[cfg(feature = "serial")]
#[async_trait]
impl ObdTransport for SerialTransport {
    fn describe(&self) -> String {
        format!("serial://{}@{}", self.path, self.baud_rate)
    }

    async fn open(&mut self, timeout: Duration) -> Result<(), ObdError> {
        let path = self.path.clone();
        let baud_rate = self.baud_rate;
        let port = tokio::task::spawn_blocking(move || {
            serialport::new(path, baud_rate)
                .timeout(Duration::from_millis(100))
                .open()
        });
        let port = tokio::time::timeout(timeout, port)
            .await
            .map_err(|_| ObdError::Timeout(timeout))?
            .map_err(join_error)??;
        self.port = Some(port);
        debug!("Opened {}", self.describe());
        Ok(())
    }

    async fn close(&mut self) {
        self.port = None;
    }

    async fn send_command(&mut self, command: &str, timeout: Duration) -> Result<String, ObdError> {
        let mut port = self.port.take().ok_or(ObdError::NotOpen)?;
        let command = command.to_string();

        let (port, result) = tokio::task::spawn_blocking(move || {
            let result = blocking_exchange(port.as_mut(), &command, timeout);
            (port, result)
        })
        .await
        .map_err(join_error)?;

        self.port = Some(port);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_read_until_prompt_strips_prompt() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(b"41 0C 1A F8\r\r>").await.unwrap();
        let text = read_until_prompt(&mut server).await.unwrap();
        assert_eq!(text, "41 0C 1A F8\r\r");
    }

    #[tokio::test]
    async fn test_read_until_prompt_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(read_until_prompt(&mut server).await.is_err());
    }

    #[tokio::test]
    async fn test_tcp_transport_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = socket.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"ATZ\r");
            socket.write_all(b"ELM327 v1.5\r\r>").await.unwrap();
        });

        let mut transport = TcpTransport::new(addr.to_string());
        transport.open(Duration::from_secs(2)).await.unwrap();
        let reply = transport
            .send_command("ATZ", Duration::from_secs(2))
            .await
            .unwrap();
        assert!(reply.contains("ELM327"));
        transport.close().await;
    }

    #[tokio::test]
    async fn test_send_before_open_fails() {
        let mut transport = TcpTransport::new("127.0.0.1:1".to_string());
        let result = transport.send_command("ATZ", Duration::from_millis(50)).await;
        assert!(matches!(result, Err(ObdError::NotOpen)));
    }

    #[test]
    fn test_simulator_selected() {
        let settings = ObdSettings {
            connection_type: ConnectionType::Simulator,
            ..ObdSettings::default()
        };
        let transport = transport_for(&settings).unwrap();
        assert!(transport.describe().starts_with("simulator"));
    }
}
