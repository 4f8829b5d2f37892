//! TEMPer USB thermometers (0c45:7401) through Linux `hidraw` nodes.
//!
//! The probe exposes two HID interfaces; temperature is served on interface 1.
//! A read writes one 8-byte command report and receives an 8-byte answer whose
//! bytes 2..4 are a big-endian signed value in 1/256 °C.

use super::{BusAddress, Sensor, SensorError};
use crate::config::Units;
use log::debug;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

const SYSFS_HIDRAW: &str = "/sys/class/hidraw";
const DEV_DIR: &str = "/dev";
const TEMPER_VENDOR_ID: u16 = 0x0c45;
const TEMPER_PRODUCT_ID: u16 = 0x7401;
const TEMPERATURE_INTERFACE: u32 = 1;
/// Report id 0 followed by the 8-byte "read temperature" command.
const READ_TEMPERATURE: [u8; 9] = [0x00, 0x01, 0x80, 0x33, 0x01, 0x00, 0x00, 0x00, 0x00];

pub struct TemperSensor {
    node: PathBuf,
    address: BusAddress,
    timeout: Duration,
    /// Started on first read and reused for the life of the sensor.
    reader: Option<Reader>,
}

impl TemperSensor {
    #[cfg(test)]
    pub fn node(&self) -> &Path {
        &self.node
    }
}

pub fn enumerate(timeout: Duration) -> Result<Vec<Box<dyn Sensor>>, SensorError> {
    let found = enumerate_in(Path::new(SYSFS_HIDRAW), Path::new(DEV_DIR), timeout)?;
    Ok(found.into_iter().map(|s| Box::new(s) as Box<dyn Sensor>).collect())
}

fn enumerate_in(sysfs: &Path, dev_dir: &Path, timeout: Duration) -> Result<Vec<TemperSensor>, SensorError> {
    let entries = match fs::read_dir(sysfs) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut found = Vec::new();
    for entry in entries {
        let entry = entry?;
        let device_link = entry.path().join("device");
        let Ok(uevent) = fs::read_to_string(device_link.join("uevent")) else {
            continue;
        };
        if parse_hid_id(&uevent) != Some((TEMPER_VENDOR_ID, TEMPER_PRODUCT_ID)) {
            continue;
        }

        // .../usb1/1-1/1-1.2/1-1.2:1.1/0003:0C45:7401.0002
        let device = fs::canonicalize(&device_link)?;
        let Some((address, interface)) = device
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .and_then(parse_usb_interface)
        else {
            debug!("Skipping {}: unrecognised device path {}", entry.path().display(), device.display());
            continue;
        };
        if interface != TEMPERATURE_INTERFACE {
            continue;
        }

        found.push(TemperSensor {
            node: dev_dir.join(entry.file_name()),
            address,
            timeout,
            reader: None,
        });
    }

    found.sort_by_key(|s| (s.address.bus, s.address.port_path()));
    Ok(found)
}

/// `HID_ID=0003:00000C45:00007401` -> `(0x0c45, 0x7401)`
fn parse_hid_id(uevent: &str) -> Option<(u16, u16)> {
    let value = uevent.lines().find_map(|l| l.strip_prefix("HID_ID="))?;
    let mut parts = value.trim().split(':');
    let _bus_type = parts.next()?;
    let vendor = u32::from_str_radix(parts.next()?, 16).ok()?;
    let product = u32::from_str_radix(parts.next()?, 16).ok()?;
    Some((u16::try_from(vendor).ok()?, u16::try_from(product).ok()?))
}

/// `1-1.2:1.1` -> bus 1, ports `1.2`, interface 1
fn parse_usb_interface(name: &str) -> Option<(BusAddress, u32)> {
    let (port_path, config_iface) = name.split_once(':')?;
    let (bus, ports) = port_path.split_once('-')?;
    let (_config, interface) = config_iface.split_once('.')?;
    Some((
        BusAddress {
            bus: bus.parse().ok()?,
            ports: ports.to_string(),
        },
        interface.parse().ok()?,
    ))
}

/// One background thread per probe that runs queries on request. hidraw reads
/// block until the probe answers, so a wedged probe ties up this thread and
/// its file handle, never more than one of each.
struct Reader {
    requests: Sender<()>,
    responses: Receiver<io::Result<Vec<u8>>>,
    /// A request was sent and its answer has not been collected yet.
    pending: bool,
}

impl Reader {
    fn spawn<F>(name: String, mut query: F) -> io::Result<Self>
    where
        F: FnMut() -> io::Result<Vec<u8>> + Send + 'static,
    {
        let (requests, request_rx) = mpsc::channel::<()>();
        let (response_tx, responses) = mpsc::channel();
        thread::Builder::new().name(name).spawn(move || {
            while request_rx.recv().is_ok() {
                if response_tx.send(query()).is_err() {
                    break;
                }
            }
        })?;
        Ok(Reader {
            requests,
            responses,
            pending: false,
        })
    }

    /// Wait up to `timeout` for an answer. While an earlier request is still
    /// unanswered no new one is sent, and its late answer is taken instead.
    fn request(&mut self, timeout: Duration) -> Result<Vec<u8>, SensorError> {
        if !self.pending {
            self.requests.send(()).map_err(|_| reader_gone())?;
            self.pending = true;
        }
        match self.responses.recv_timeout(timeout) {
            Ok(result) => {
                self.pending = false;
                Ok(result?)
            }
            Err(RecvTimeoutError::Timeout) => Err(SensorError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(reader_gone()),
        }
    }
}

fn reader_gone() -> SensorError {
    SensorError::Protocol("reader thread exited without a response".to_string())
}

fn query_node(node: &Path) -> io::Result<Vec<u8>> {
    let mut file = OpenOptions::new().read(true).write(true).open(node)?;
    query(&mut file)
}

fn query(file: &mut File) -> io::Result<Vec<u8>> {
    file.write_all(&READ_TEMPERATURE)?;
    let mut buf = [0u8; 8];
    let n = file.read(&mut buf)?;
    Ok(buf[..n].to_vec())
}

fn decode_celsius(response: &[u8]) -> Result<f64, SensorError> {
    if response.len() < 4 {
        return Err(SensorError::Protocol(format!(
            "short response ({} byte(s))",
            response.len()
        )));
    }
    let raw = i16::from_be_bytes([response[2], response[3]]);
    Ok(f64::from(raw) / 256.0)
}

impl Sensor for TemperSensor {
    fn address(&self) -> &BusAddress {
        &self.address
    }

    fn read(&mut self, units: Units) -> Result<f64, SensorError> {
        if self.reader.is_none() {
            let node = self.node.clone();
            let name = format!("temper-{}", self.address);
            self.reader = Some(Reader::spawn(name, move || query_node(&node))?);
        }
        let reader = self.reader.as_mut().ok_or_else(reader_gone)?;
        let response = match reader.request(self.timeout) {
            Err(e @ SensorError::Protocol(_)) => {
                // restart on next read
                self.reader = None;
                return Err(e);
            }
            other => other?,
        };

        let celsius = decode_celsius(&response)?;
        debug!("{} ({}) reported {:.2} C", self.node.display(), self.address, celsius);
        Ok(units.convert_celsius(celsius))
    }
}
