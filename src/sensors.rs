//! Local temperature probes.
//!
//! Probes are enumerated once at startup; the returned order is the order in
//! which they are sampled and bound to chart channels for the whole run.

pub mod simulated;
pub mod temper;

use crate::config::{SensorBackend, SensorsConfig, Units};
use core::fmt;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

#[derive(Debug)]
pub enum SensorError {
    /// Enumeration found nothing to sample.
    NoSensorsFound,
    Io(std::io::Error),
    /// The probe did not answer within the configured bound.
    Timeout(Duration),
    /// The probe answered with something we cannot decode.
    Protocol(String),
}

impl Display for SensorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::NoSensorsFound => write!(f, "no temperature sensors found"),
            SensorError::Io(e) => write!(f, "io error: {}", e),
            SensorError::Timeout(d) => write!(f, "no response within {}ms", d.as_millis()),
            SensorError::Protocol(s) => write!(f, "protocol error: {}", s),
        }
    }
}

impl Error for SensorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SensorError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SensorError {
    fn from(value: std::io::Error) -> Self {
        SensorError::Io(value)
    }
}

/// Physical location of a probe on the USB tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusAddress {
    pub bus: u32,
    /// Dotted port path, e.g. `1.2`.
    pub ports: String,
}

impl BusAddress {
    /// Numeric port components, so `1.2` orders before `1.10`.
    pub fn port_path(&self) -> Vec<u32> {
        self.ports.split('.').map(|p| p.parse().unwrap_or(u32::MAX)).collect()
    }
}

impl Display for BusAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bus, self.ports)
    }
}

pub trait Sensor {
    fn address(&self) -> &BusAddress;

    /// Take one reading. Failures are transient; the next call may succeed.
    fn read(&mut self, units: Units) -> Result<f64, SensorError>;
}

/// Enumerate the probes of the configured backend. Finding none is an error.
pub fn discover(cfg: &SensorsConfig, timeout: Duration) -> Result<Vec<Box<dyn Sensor>>, SensorError> {
    let sensors = match cfg.backend {
        SensorBackend::Temper => temper::enumerate(timeout)?,
        SensorBackend::Simulated => simulated::enumerate(cfg.simulated_count),
    };
    if sensors.is_empty() {
        return Err(SensorError::NoSensorsFound);
    }
    Ok(sensors)
}

/// Human-readable labels in discovery order: a lone probe is just "Sensor",
/// several are numbered from 1 and carry their bus address.
pub fn sensor_names(addresses: &[&BusAddress]) -> Vec<String> {
    if addresses.len() == 1 {
        return vec!["Sensor".to_string()];
    }
    addresses
        .iter()
        .enumerate()
        .map(|(i, addr)| format!("Sensor {} ({}/{})", i + 1, addr.bus, addr.ports))
        .collect()
}
