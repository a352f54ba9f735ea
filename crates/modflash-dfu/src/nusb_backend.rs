//! [`UsbBackend`] implementation on top of `nusb`

use async_trait::async_trait;
use nusb::transfer::{ControlIn, ControlOut, ControlType, Recipient, TransferError as NusbTransferError};
use nusb::{Device, DeviceInfo, Interface};
#[cfg(not(target_os = "windows"))]
use std::time::Duration;
use tracing::{debug, info};

use crate::descriptor::{
    DFU_CLASS, DFU_PROTOCOL_DFU_MODE, DFU_SUBCLASS, FunctionalDescriptor, InterfaceDescriptor,
};
use crate::error::TransportError;
use crate::protocol::DfuRequest;
use crate::usb::{UsbBackend, UsbDfuTransport};

/// STMicroelectronics vendor ID, used by the STM32 system bootloader
pub const STMICRO_VENDOR_ID: u16 = 0x0483;

#[cfg(not(target_os = "windows"))]
const US_ENGLISH: u16 = 0x0409;
#[cfg(not(target_os = "windows"))]
const STRING_TIMEOUT: Duration = Duration::from_millis(500);

/// USB device reached through `nusb`
pub struct NusbBackend {
    info: DeviceInfo,
    device: Option<Device>,
    interface: Option<Interface>,
}

impl NusbBackend {
    /// Wrap an enumerated device; nothing is opened until [`UsbBackend::open`]
    pub fn new(info: DeviceInfo) -> Self {
        Self {
            info,
            device: None,
            interface: None,
        }
    }

    /// Enumeration data for the device
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Wrap into a DFU transport
    pub fn into_transport(self) -> UsbDfuTransport<Self> {
        UsbDfuTransport::new(self)
    }

    fn device(&self) -> Result<&Device, TransportError> {
        self.device
            .as_ref()
            .ok_or_else(|| TransportError::Io("device is not open".to_string()))
    }

    fn interface(&self) -> Result<&Interface, TransportError> {
        self.interface
            .as_ref()
            .ok_or_else(|| TransportError::Io("no interface claimed".to_string()))
    }
}

/// List connected devices that expose a DFU-mode interface
///
/// With `vendor_id` set only that vendor's devices are returned.
///
/// # Errors
///
/// Returns [`TransportError::Io`] when the bus cannot be enumerated.
pub fn find_bootloaders(vendor_id: Option<u16>) -> Result<Vec<NusbBackend>, TransportError> {
    let devices = nusb::list_devices().map_err(io_error)?;

    let found: Vec<NusbBackend> = devices
        .filter(|info| vendor_id.is_none_or(|vid| info.vendor_id() == vid))
        .filter(|info| {
            info.interfaces().any(|i| {
                i.class() == DFU_CLASS
                    && i.subclass() == DFU_SUBCLASS
                    && i.protocol() == DFU_PROTOCOL_DFU_MODE
            })
        })
        .map(NusbBackend::new)
        .collect();

    debug!(count = found.len(), ?vendor_id, "Enumerated DFU devices");
    Ok(found)
}

fn io_error(e: std::io::Error) -> TransportError {
    TransportError::Io(e.to_string())
}

/// Alternate-setting name, best effort
#[cfg(not(target_os = "windows"))]
fn string_descriptor(device: &Device, index: Option<u8>) -> Option<String> {
    let index = index?;
    match device.get_string_descriptor(index, US_ENGLISH, STRING_TIMEOUT) {
        Ok(name) => Some(name),
        Err(e) => {
            debug!(index, error = %e, "Could not read interface name");
            None
        }
    }
}

#[cfg(target_os = "windows")]
fn string_descriptor(_device: &Device, _index: Option<u8>) -> Option<String> {
    None
}

fn transfer_error(e: NusbTransferError) -> TransportError {
    match e {
        NusbTransferError::Stall => TransportError::Rejected("request stalled".to_string()),
        NusbTransferError::Disconnected => TransportError::Disconnected,
        other => TransportError::Io(other.to_string()),
    }
}

#[async_trait]
impl UsbBackend for NusbBackend {
    async fn open(&mut self) -> Result<(), TransportError> {
        let device = self.info.open().map_err(io_error)?;
        info!(device = %self.label(), "Opened USB device");
        self.device = Some(device);
        Ok(())
    }

    async fn interfaces(&mut self) -> Result<Vec<InterfaceDescriptor>, TransportError> {
        let device = self.device()?;
        let config = device
            .active_configuration()
            .map_err(|e| TransportError::Io(e.to_string()))?;

        let interfaces = config
            .interface_alt_settings()
            .map(|alt| InterfaceDescriptor {
                interface_number: alt.interface_number(),
                alt_setting: alt.alternate_setting(),
                class: alt.class(),
                subclass: alt.subclass(),
                protocol: alt.protocol(),
                name: string_descriptor(device, alt.string_index()),
                functional: alt
                    .descriptors()
                    .find_map(|d| FunctionalDescriptor::parse(&d)),
            })
            .collect();
        Ok(interfaces)
    }

    async fn claim_interface(&mut self, interface_number: u8) -> Result<(), TransportError> {
        let interface = self
            .device()?
            .claim_interface(interface_number)
            .map_err(io_error)?;
        self.interface = Some(interface);
        Ok(())
    }

    async fn set_alt_setting(
        &mut self,
        _interface_number: u8,
        alt_setting: u8,
    ) -> Result<(), TransportError> {
        self.interface()?
            .set_alt_setting(alt_setting)
            .map_err(io_error)
    }

    async fn class_out(
        &mut self,
        interface_number: u8,
        request: DfuRequest,
        value: u16,
        data: &[u8],
    ) -> Result<(), TransportError> {
        self.interface()?
            .control_out(ControlOut {
                control_type: ControlType::Class,
                recipient: Recipient::Interface,
                request: request.code(),
                value,
                index: u16::from(interface_number),
                data,
            })
            .await
            .into_result()
            .map(|_| ())
            .map_err(transfer_error)
    }

    async fn class_in(
        &mut self,
        interface_number: u8,
        request: DfuRequest,
        value: u16,
        length: u16,
    ) -> Result<Vec<u8>, TransportError> {
        self.interface()?
            .control_in(ControlIn {
                control_type: ControlType::Class,
                recipient: Recipient::Interface,
                request: request.code(),
                value,
                index: u16::from(interface_number),
                length,
            })
            .await
            .into_result()
            .map_err(transfer_error)
    }

    async fn reset(&mut self) -> Result<(), TransportError> {
        self.interface = None;
        match self.device()?.reset() {
            Ok(()) => Ok(()),
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::NotConnected
                ) =>
            {
                Err(TransportError::Disconnected)
            }
            Err(e) => Err(io_error(e)),
        }
    }

    async fn release(&mut self) -> Result<(), TransportError> {
        self.interface = None;
        self.device = None;
        Ok(())
    }

    fn label(&self) -> String {
        let product = self.info.product_string().unwrap_or("USB device");
        format!(
            "{product} ({:04x}:{:04x} bus {} addr {})",
            self.info.vendor_id(),
            self.info.product_id(),
            self.info.bus_number(),
            self.info.device_address()
        )
    }
}
