/// A UsbContext and UsbDevice for interacting with the physical
/// USB device.
use std::time::Duration;

use log::{debug, info};
pub use rusb::{Context, UsbContext};
use rusb::{DeviceHandle, Error};

use super::{error::AntError, transport::Transport, Result};

pub const VENDOR_ID: u16 = 0x0FCF;
/// nRF24AP2-USB, the stick shipped with Garmin devices.
pub const PRODUCT_ID_ANTUSB2: u16 = 0x1008;
pub const PRODUCT_ID_ANTUSB_M: u16 = 0x1009;
const USB_ANT_INTERFACE: u8 = 0;
const USB_ANT_EP_IN: u8 = 0x81;
const USB_ANT_EP_OUT: u8 = 0x01;

/// UsbDevice struct that holds the device handle to the USB device.
pub struct UsbDevice<T: UsbContext> {
    handle: DeviceHandle<T>,
}

impl<T: UsbContext> UsbDevice<T> {
    /// Initialize the USB device for the first ANT USB stick plugged in.
    pub fn init(ctx: &mut T) -> Result<UsbDevice<T>> {
        Self::init_product(ctx, &[PRODUCT_ID_ANTUSB2, PRODUCT_ID_ANTUSB_M])
    }

    /// Initialize the first ANT USB stick whose product id is in `products`.
    pub fn init_product(ctx: &mut T, products: &[u16]) -> Result<UsbDevice<T>> {
        for device in ctx.devices()?.iter() {
            let device_desc = device.device_descriptor()?;
            if device_desc.vendor_id() != VENDOR_ID
                || !products.contains(&device_desc.product_id())
            {
                continue;
            }
            info!(
                "Found ANT USB device {:04x}:{:04x} on bus {} address {}",
                device_desc.vendor_id(),
                device_desc.product_id(),
                device.bus_number(),
                device.address()
            );
            let mut handle = device.open()?;
            match handle.reset() {
                Ok(_) => {}
                // The device re-enumerated during reset, open it again.
                Err(Error::NotFound) => {
                    debug!("Device re-enumerated after reset, reopening");
                    handle = device.open()?;
                }
                Err(e) => return Err(AntError::UsbDeviceError(e)),
            }
            handle.claim_interface(USB_ANT_INTERFACE)?;
            return Ok(UsbDevice { handle });
        }
        Err(AntError::UsbDeviceError(Error::NoDevice))
    }
}

impl<T: UsbContext> Transport for UsbDevice<T> {
    /// Bulk read from the IN endpoint. A USB timeout reads zero bytes.
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        match self.handle.read_bulk(USB_ANT_EP_IN, buf, timeout) {
            Ok(len) => Ok(len),
            Err(Error::Timeout) | Err(Error::Interrupted) => Ok(0),
            Err(e) => Err(AntError::UsbDeviceError(e)),
        }
    }

    /// Bulk write to the OUT endpoint.
    fn write(&self, message: &[u8], timeout: Duration) -> Result<usize> {
        self.handle
            .write_bulk(USB_ANT_EP_OUT, message, timeout)
            .map_err(AntError::UsbDeviceError)
    }
}
