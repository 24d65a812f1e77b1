//! Device discovery and classification utilities.
//!
//! A TL866 shows up in one of two shapes:
//!
//! - in application mode, open-tl866 enumerates as a composite device with a
//!   CDC serial interface (the ASCII protocol) next to the stock-compatible
//!   vendor interface;
//! - in bootloader mode only the vendor interface with its bulk endpoint
//!   pair is present.
//!
//! [`Discovery`] enumerates both transports and opens a [`Port`] for a
//! [`DetectedDevice`]. The reconnect loop in [`reconnect`] builds on it.

pub mod reconnect;

use std::fmt;

use crate::{
    error::{Error, Result},
    port::Port,
};

#[cfg(feature = "native")]
use log::{debug, trace};

/// Transport type for discovered endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransportKind {
    /// Serial transport (USB CDC ACM).
    Serial,
    /// Raw USB bulk endpoints.
    Usb,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::Usb => write!(f, "usb"),
        }
    }
}

/// USB identity classes a TL866 can present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceKind {
    /// Autoelectric IDs (stock firmware, stock bootloader, open-tl866 app).
    Tl866,
    /// pid.codes IDs assigned to open-tl866.
    Tl866Open,
    /// Anything else.
    Unknown,
}

/// Autoelectric vendor/product pair.
pub const AE_USB_ID: (u16, u16) = (0x04D8, 0xE11C);
/// Open vendor/product pair.
pub const OPEN_USB_ID: (u16, u16) = (0x1209, 0x8661);
/// Every vendor/product pair a TL866 bootloader may enumerate with.
pub const BOOTLOADER_USB_IDS: &[(u16, u16)] = &[AE_USB_ID, OPEN_USB_ID];

/// Known USB VID/PID pairs.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (AE_USB_ID.0, &[AE_USB_ID.1], DeviceKind::Tl866),
    (OPEN_USB_ID.0, &[OPEN_USB_ID.1], DeviceKind::Tl866Open),
];

impl DeviceKind {
    /// Classify a VID/PID combination.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, pids, device) in KNOWN_USB_DEVICES {
            if vid == *known_vid && (pids.is_empty() || pids.contains(&pid)) {
                return *device;
            }
        }
        Self::Unknown
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tl866 => "TL866",
            Self::Tl866Open => "TL866 (open IDs)",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// What the device is believed to be running.
///
/// Only trustworthy right after a fresh report; discovery fills in what it
/// can infer from the transport alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    /// Not yet queried.
    #[default]
    Unknown,
    /// Application firmware.
    Normal,
    /// Bootloader.
    Bootloader,
}

/// Physical USB position of a device.
///
/// The bus and port chain survive a re-enumeration; the address does not.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UsbLocation {
    /// Bus identifier as reported by the OS.
    pub bus: String,
    /// Hub port numbers from the root to the device.
    pub ports: Vec<u8>,
    /// Bus address, reassigned on every enumeration.
    pub address: u8,
}

impl UsbLocation {
    /// Same hub port, regardless of address.
    pub fn same_position(&self, other: &Self) -> bool {
        self.bus == other.bus && self.ports == other.ports
    }
}

impl fmt::Display for UsbLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ports = self
            .ports
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(".");
        write!(f, "usb {}-{} addr {}", self.bus, ports, self.address)
    }
}

/// Discovered device endpoint information.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectedDevice {
    /// Endpoint name: serial path, or USB location string.
    pub name: String,
    /// Transport type.
    pub transport: TransportKind,
    /// Classified device kind.
    pub kind: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Physical USB position (USB transport only).
    pub location: Option<UsbLocation>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
    /// Believed mode.
    pub mode: Mode,
}

impl DetectedDevice {
    /// A serial endpoint known only by its path, e.g. one named by the user.
    pub fn serial_port(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Serial,
            kind: DeviceKind::Unknown,
            vid: None,
            pid: None,
            location: None,
            product: None,
            serial: None,
            mode: Mode::Normal,
        }
    }

    /// Check if this endpoint is a TL866.
    pub fn is_tl866(&self) -> bool {
        self.kind.is_known()
    }

    /// VID:PID as `04D8:E11C`, if known.
    pub fn usb_id(&self) -> Option<String> {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => Some(format!("{vid:04X}:{pid:04X}")),
            _ => None,
        }
    }
}

/// Criteria for selecting devices out of an enumeration.
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    /// Restrict to one transport.
    pub transport: Option<TransportKind>,
    /// Accepted VID/PID pairs; empty accepts all.
    pub ids: Vec<(u16, u16)>,
    /// Exact endpoint name.
    pub name: Option<String>,
}

impl DeviceFilter {
    /// TL866 devices on the given transport.
    pub fn tl866(transport: TransportKind) -> Self {
        Self {
            transport: Some(transport),
            ids: BOOTLOADER_USB_IDS.to_vec(),
            name: None,
        }
    }

    /// Restrict to an exact endpoint name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Check a device against every set criterion.
    pub fn matches(&self, device: &DetectedDevice) -> bool {
        if self
            .transport
            .is_some_and(|t| t != device.transport)
        {
            return false;
        }
        if self
            .name
            .as_ref()
            .is_some_and(|name| *name != device.name)
        {
            return false;
        }
        if self.ids.is_empty() {
            return true;
        }
        match (device.vid, device.pid) {
            (Some(vid), Some(pid)) => self.ids.contains(&(vid, pid)),
            _ => false,
        }
    }
}

/// Enumerates devices and opens transports to them.
pub trait Discovery {
    /// Every endpoint on every supported transport.
    fn list_all(&self) -> Result<Vec<DetectedDevice>>;

    /// Open a transport to a previously detected device.
    fn open(&self, device: &DetectedDevice) -> Result<Box<dyn Port>>;

    /// Endpoints matching `filter`.
    fn list_devices(&self, filter: &DeviceFilter) -> Result<Vec<DetectedDevice>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|d| filter.matches(d))
            .collect())
    }

    /// Exactly one endpoint matching `filter`.
    fn find_one(&self, filter: &DeviceFilter) -> Result<DetectedDevice> {
        let mut devices = self.list_devices(filter)?;
        match devices.len() {
            0 => Err(Error::DeviceNotFound),
            1 => Ok(devices.remove(0)),
            n => Err(Error::MultipleDevices(n)),
        }
    }
}

impl<D: Discovery + ?Sized> Discovery for &D {
    fn list_all(&self) -> Result<Vec<DetectedDevice>> {
        (**self).list_all()
    }

    fn open(&self, device: &DetectedDevice) -> Result<Box<dyn Port>> {
        (**self).open(device)
    }
}

/// Discovery over the host's serial ports and USB bus.
#[cfg(feature = "native")]
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeDiscovery;

#[cfg(feature = "native")]
impl NativeDiscovery {
    /// Enumerate serial ports.
    pub fn serial_devices() -> Vec<DetectedDevice> {
        let mut result = Vec::new();

        match serialport::available_ports() {
            Ok(ports) => {
                for port_info in ports {
                    let mut detected = DetectedDevice {
                        name: port_info.port_name.clone(),
                        transport: TransportKind::Serial,
                        kind: DeviceKind::Unknown,
                        vid: None,
                        pid: None,
                        location: None,
                        product: None,
                        serial: None,
                        mode: Mode::Unknown,
                    };

                    if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                        detected.vid = Some(usb_info.vid);
                        detected.pid = Some(usb_info.pid);
                        detected.product = usb_info.product;
                        detected.serial = usb_info.serial_number;
                        detected.kind = DeviceKind::from_vid_pid(usb_info.vid, usb_info.pid);
                        // Only application firmware has a CDC interface.
                        if detected.kind.is_known() {
                            detected.mode = Mode::Normal;
                        }

                        trace!(
                            "Found serial port: {} (VID: {:04X}, PID: {:04X}, Kind: {:?})",
                            port_info.port_name, usb_info.vid, usb_info.pid, detected.kind
                        );
                    }

                    result.push(detected);
                }
            },
            Err(e) => {
                debug!("Failed to enumerate serial ports: {e}");
            },
        }

        result
    }

    /// Enumerate USB devices.
    pub fn usb_devices() -> Result<Vec<DetectedDevice>> {
        use nusb::MaybeFuture;

        let devices = nusb::list_devices()
            .wait()
            .map_err(|e| Error::Usb(e.to_string()))?;

        Ok(devices
            .map(|info| {
                let location = UsbLocation {
                    bus: info
                        .bus_id()
                        .to_string(),
                    ports: info
                        .port_chain()
                        .to_vec(),
                    address: info.device_address(),
                };
                let kind = DeviceKind::from_vid_pid(info.vendor_id(), info.product_id());
                trace!(
                    "Found USB device: {location} (VID: {:04X}, PID: {:04X}, Kind: {kind:?})",
                    info.vendor_id(),
                    info.product_id()
                );
                DetectedDevice {
                    name: location.to_string(),
                    transport: TransportKind::Usb,
                    kind,
                    vid: Some(info.vendor_id()),
                    pid: Some(info.product_id()),
                    location: Some(location),
                    product: info
                        .product_string()
                        .map(str::to_string),
                    serial: info
                        .serial_number()
                        .map(str::to_string),
                    mode: Mode::Unknown,
                }
            })
            .collect())
    }

    fn find_usb_info(location: &UsbLocation) -> Result<nusb::DeviceInfo> {
        use nusb::MaybeFuture;

        nusb::list_devices()
            .wait()
            .map_err(|e| Error::Usb(e.to_string()))?
            .find(|info| {
                info.bus_id() == location.bus
                    && info.port_chain() == location.ports.as_slice()
                    && info.device_address() == location.address
            })
            .ok_or(Error::DeviceNotFound)
    }
}

#[cfg(feature = "native")]
impl Discovery for NativeDiscovery {
    fn list_all(&self) -> Result<Vec<DetectedDevice>> {
        let mut devices = Self::serial_devices();
        devices.extend(Self::usb_devices()?);
        Ok(devices)
    }

    fn open(&self, device: &DetectedDevice) -> Result<Box<dyn Port>> {
        match device.transport {
            TransportKind::Serial => {
                let config = crate::port::SerialConfig::new(&device.name);
                Ok(Box::new(crate::port::NativePort::open(&config)?))
            },
            TransportKind::Usb => {
                let location = device
                    .location
                    .as_ref()
                    .ok_or_else(|| Error::Usb(format!("{} has no USB location", device.name)))?;
                let info = Self::find_usb_info(location)?;
                Ok(Box::new(crate::port::UsbPort::open(&info)?))
            },
        }
    }
}

/// Format a list of detected endpoints for display.
pub fn format_device_list(devices: &[DetectedDevice]) -> Vec<String> {
    let mut result = Vec::new();

    for device in devices {
        let device_info = if device.kind.is_known() {
            format!(" [{}]", device.kind.name())
        } else if let Some(id) = device.usb_id() {
            format!(" [{id}]")
        } else {
            String::new()
        };

        let product_info = device
            .product
            .as_ref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();

        result.push(format!(
            "{} ({}){}{}",
            device.name, device.transport, device_info, product_info
        ));
    }

    result
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory discovery for orchestration tests.

    use {
        super::*,
        crate::port::mock::MockPort,
        std::{
            collections::VecDeque,
            sync::{Arc, Mutex},
        },
    };

    pub fn usb(address: u8, id: (u16, u16)) -> DetectedDevice {
        let location = UsbLocation {
            bus: "1".to_string(),
            ports: vec![3, 2],
            address,
        };
        DetectedDevice {
            name: location.to_string(),
            transport: TransportKind::Usb,
            kind: DeviceKind::from_vid_pid(id.0, id.1),
            vid: Some(id.0),
            pid: Some(id.1),
            location: Some(location),
            product: None,
            serial: None,
            mode: Mode::Unknown,
        }
    }

    pub fn serial(name: &str) -> DetectedDevice {
        DetectedDevice {
            name: name.to_string(),
            transport: TransportKind::Serial,
            kind: DeviceKind::Tl866,
            vid: Some(AE_USB_ID.0),
            pid: Some(AE_USB_ID.1),
            location: None,
            product: Some("open-tl866".to_string()),
            serial: None,
            mode: Mode::Normal,
        }
    }

    /// Each `list_all` call pops the next snapshot; the last one repeats.
    /// `open` hands out ports by device name, in order.
    #[derive(Default)]
    pub struct FakeDiscovery {
        pub failures: Mutex<usize>,
        pub snapshots: Mutex<VecDeque<Vec<DetectedDevice>>>,
        pub ports: Mutex<Vec<(String, MockPort)>>,
        pub opened: Arc<Mutex<Vec<String>>>,
    }

    impl FakeDiscovery {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn snapshot(self, devices: Vec<DetectedDevice>) -> Self {
            self.snapshots.lock().unwrap().push_back(devices);
            self
        }

        /// Make the next `list_all` call fail before any snapshot is used.
        pub fn fail_next(self) -> Self {
            *self.failures.lock().unwrap() += 1;
            self
        }

        pub fn port(self, name: &str, port: MockPort) -> Self {
            self.ports.lock().unwrap().push((name.to_string(), port));
            self
        }
    }

    impl Discovery for FakeDiscovery {
        fn list_all(&self) -> Result<Vec<DetectedDevice>> {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::Usb("enumeration failed".to_string()));
            }
            let mut snapshots = self.snapshots.lock().unwrap();
            if snapshots.len() > 1 {
                Ok(snapshots.pop_front().unwrap())
            } else {
                Ok(snapshots.front().cloned().unwrap_or_default())
            }
        }

        fn open(&self, device: &DetectedDevice) -> Result<Box<dyn Port>> {
            let mut ports = self.ports.lock().unwrap();
            let index = ports
                .iter()
                .position(|(name, _)| *name == device.name)
                .ok_or(Error::DeviceNotFound)?;
            let (name, port) = ports.remove(index);
            self.opened.lock().unwrap().push(name);
            Ok(Box::new(port))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{testing::*, *};

    #[test]
    fn test_device_kind_from_vid_pid() {
        assert_eq!(DeviceKind::from_vid_pid(0x04D8, 0xE11C), DeviceKind::Tl866);
        assert_eq!(DeviceKind::from_vid_pid(0x1209, 0x8661), DeviceKind::Tl866Open);
        assert_eq!(DeviceKind::from_vid_pid(0x04D8, 0x0001), DeviceKind::Unknown);
        assert_eq!(DeviceKind::from_vid_pid(0x1234, 0x5678), DeviceKind::Unknown);
    }

    #[test]
    fn test_location_same_position_ignores_address() {
        let a = usb(7, AE_USB_ID).location.unwrap();
        let b = usb(9, OPEN_USB_ID).location.unwrap();
        assert!(a.same_position(&b));
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "usb 1-3.2 addr 7");
    }

    #[test]
    fn test_filter_matches() {
        let boot = usb(4, OPEN_USB_ID);
        let tty = serial("/dev/ttyACM0");

        let usb_filter = DeviceFilter::tl866(TransportKind::Usb);
        assert!(usb_filter.matches(&boot));
        assert!(!usb_filter.matches(&tty));

        let by_name = DeviceFilter::default().with_name("/dev/ttyACM0");
        assert!(by_name.matches(&tty));
        assert!(!by_name.matches(&boot));

        let mut other = usb(5, (0x1234, 0x5678));
        assert!(!usb_filter.matches(&other));
        other.vid = None;
        assert!(DeviceFilter::default().matches(&other));
    }

    #[test]
    fn test_find_one_counts() {
        let discovery = FakeDiscovery::new().snapshot(vec![
            usb(4, AE_USB_ID),
            usb(5, (0x1234, 0x5678)),
        ]);
        let found = discovery
            .find_one(&DeviceFilter::tl866(TransportKind::Usb))
            .unwrap();
        assert_eq!(found.location.unwrap().address, 4);

        let none = FakeDiscovery::new().snapshot(vec![]);
        assert!(matches!(
            none.find_one(&DeviceFilter::default()),
            Err(Error::DeviceNotFound)
        ));

        let two = FakeDiscovery::new().snapshot(vec![usb(4, AE_USB_ID), usb(6, OPEN_USB_ID)]);
        assert!(matches!(
            two.find_one(&DeviceFilter::tl866(TransportKind::Usb)),
            Err(Error::MultipleDevices(2))
        ));
    }

    #[test]
    fn test_format_device_list() {
        let devices = vec![
            serial("/dev/ttyACM0"),
            usb(5, (0x1234, 0x5678)),
        ];

        let formatted = format_device_list(&devices);
        assert_eq!(formatted.len(), 2);
        assert_eq!(formatted[0], "/dev/ttyACM0 (serial) [TL866] - open-tl866");
        assert!(formatted[1].contains("[1234:5678]"));
        assert!(formatted[1].contains("(usb)"));
    }
}
