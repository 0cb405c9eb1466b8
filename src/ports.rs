//! Port Catalog: serial devices currently visible to the OS.

use crate::error::{AppResult, DaqError};
use serialport::{SerialPortInfo, SerialPortType};
use tracing::{debug, instrument};

/// One enumerated port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortEntry {
    /// Name passed to [`crate::transport::PortOpener::open`], e.g. `/dev/ttyUSB0` or `COM3`.
    pub name: String,
    /// Human readable device description, when the OS reports one.
    pub description: Option<String>,
}

impl From<SerialPortInfo> for PortEntry {
    fn from(info: SerialPortInfo) -> Self {
        let description = match info.port_type {
            SerialPortType::UsbPort(usb) => Some(
                [usb.manufacturer, usb.product]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join(" "),
            )
            .filter(|d| !d.is_empty())
            .or_else(|| Some(format!("USB {:04x}:{:04x}", usb.vid, usb.pid))),
            SerialPortType::BluetoothPort => Some("Bluetooth".to_string()),
            SerialPortType::PciPort => Some("PCI".to_string()),
            SerialPortType::Unknown => None,
        };
        Self {
            name: info.port_name,
            description,
        }
    }
}

/// Enumerate serial ports. No ports is an empty list, not an error.
#[instrument]
pub fn list_ports() -> AppResult<Vec<PortEntry>> {
    let ports = serialport::available_ports()
        .map_err(|e| DaqError::LinkError(format!("failed to enumerate serial ports: {e}")))?;
    let entries = catalog(ports);
    debug!(count = entries.len(), "Ports enumerated");
    Ok(entries)
}

/// Sorted by name, duplicates removed.
fn catalog(ports: Vec<SerialPortInfo>) -> Vec<PortEntry> {
    let mut entries: Vec<PortEntry> = ports.into_iter().map(PortEntry::from).collect();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    entries.dedup_by(|a, b| a.name == b.name);
    entries
}

/// Names only, in catalog order.
pub fn list_port_names() -> AppResult<Vec<String>> {
    Ok(list_ports()?.into_iter().map(|entry| entry.name).collect())
}
