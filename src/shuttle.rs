//! Contour ShuttleXpress driver
//!
//! Opens the jog wheel over HID and exposes it as a [`ReportSource`] the
//! reader thread can poll.

pub mod decoder;
pub mod report;

use std::time::Duration;

use hidapi::{HidApi, HidDevice};
use tracing::{debug, info};

use crate::error::{Result, SessionError};

pub use decoder::{ButtonId, ControlEvent, Decoder, DeviceState, DialDirection};
pub use report::Report;

/// USB vendor id of Contour Design
pub const VENDOR_ID: u16 = 0x0b33;

/// USB product id of the ShuttleXpress
pub const PRODUCT_ID: u16 = 0x0020;

/// Size of the buffer handed to each read
pub const REPORT_BUFFER_LEN: usize = 48;

/// Anything that yields raw input reports
pub trait ReportSource: Send {
    /// Block for at most `timeout` waiting for one report.
    ///
    /// Returns the number of bytes written into `buf`; `Ok(0)` means nothing
    /// arrived in time, which is not an error.
    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
}

/// Information about a connected ShuttleXpress
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub product: Option<String>,
    pub serial: Option<String>,
}

/// An opened ShuttleXpress
pub struct ShuttleDevice {
    handle: HidDevice,
}

impl ShuttleDevice {
    /// Open the first connected ShuttleXpress
    pub fn open(api: &HidApi) -> Result<Self> {
        let found = api
            .device_list()
            .any(|d| d.vendor_id() == VENDOR_ID && d.product_id() == PRODUCT_ID);
        if !found {
            return Err(SessionError::DeviceNotFound {
                vendor_id: VENDOR_ID,
                product_id: PRODUCT_ID,
            });
        }

        let handle = api
            .open(VENDOR_ID, PRODUCT_ID)
            .map_err(|e| SessionError::DeviceOpen(e.to_string()))?;

        match handle.get_product_string() {
            Ok(Some(product)) => info!("Opened {}", product),
            _ => info!("Opened ShuttleXpress"),
        }

        Ok(Self { handle })
    }
}

impl ReportSource for ShuttleDevice {
    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        self.handle
            .read_timeout(buf, millis)
            .map_err(|e| SessionError::DeviceRead(e.to_string()))
    }
}

/// List all connected ShuttleXpress units
pub fn list_devices(api: &HidApi) -> Vec<DeviceInfo> {
    let devices: Vec<DeviceInfo> = api
        .device_list()
        .filter(|d| d.vendor_id() == VENDOR_ID && d.product_id() == PRODUCT_ID)
        .map(|d| DeviceInfo {
            path: d.path().to_string_lossy().into_owned(),
            product: d.product_string().map(str::to_string),
            serial: d.serial_number().map(str::to_string),
        })
        .collect();

    debug!("Found {} ShuttleXpress device(s)", devices.len());
    devices
}
