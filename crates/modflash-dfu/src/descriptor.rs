//! USB interface and DFU functional descriptors

use serde::{Deserialize, Serialize};

/// Application-specific interface class
pub const DFU_CLASS: u8 = 0xFE;
/// Device Firmware Upgrade subclass
pub const DFU_SUBCLASS: u8 = 0x01;
/// Interface protocol of a device running its bootloader
pub const DFU_PROTOCOL_DFU_MODE: u8 = 0x02;
/// Descriptor type of the DFU functional descriptor
pub const DFU_FUNCTIONAL_DESCRIPTOR_TYPE: u8 = 0x21;
/// `bcdDFUVersion` reported by DfuSe bootloaders (ST's DFU extension)
pub const DFUSE_VERSION: u16 = 0x011A;

const ATTR_CAN_DOWNLOAD: u8 = 0x01;
const ATTR_CAN_UPLOAD: u8 = 0x02;
const ATTR_MANIFESTATION_TOLERANT: u8 = 0x04;
const ATTR_WILL_DETACH: u8 = 0x08;

/// One interface alternate setting as enumerated from the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    /// `bInterfaceNumber`
    pub interface_number: u8,
    /// `bAlternateSetting`
    pub alt_setting: u8,
    /// `bInterfaceClass`
    pub class: u8,
    /// `bInterfaceSubClass`
    pub subclass: u8,
    /// `bInterfaceProtocol`
    pub protocol: u8,
    /// Interface string, often the memory region name
    pub name: Option<String>,
    /// DFU functional descriptor attached to this interface
    pub functional: Option<FunctionalDescriptor>,
}

impl InterfaceDescriptor {
    /// Describe a DFU-mode interface
    pub fn dfu(interface_number: u8, alt_setting: u8) -> Self {
        Self {
            interface_number,
            alt_setting,
            class: DFU_CLASS,
            subclass: DFU_SUBCLASS,
            protocol: DFU_PROTOCOL_DFU_MODE,
            name: None,
            functional: None,
        }
    }

    /// Attach an interface name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach a functional descriptor
    pub fn with_functional(mut self, functional: FunctionalDescriptor) -> Self {
        self.functional = Some(functional);
        self
    }

    /// Whether this interface speaks the DFU protocol in bootloader mode
    pub fn is_bootloader(&self) -> bool {
        self.class == DFU_CLASS
            && self.subclass == DFU_SUBCLASS
            && self.protocol == DFU_PROTOCOL_DFU_MODE
    }

    /// Whether the functional descriptor announces the DfuSe extension
    ///
    /// DfuSe reuses DNLOAD block numbers 0 and 1 for commands, so plain
    /// DFU 1.1 downloads cannot be sent to it.
    pub fn is_dfuse(&self) -> bool {
        self.functional.is_some_and(|f| f.dfu_version == DFUSE_VERSION)
    }

    /// Name for log output
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("interface {} alt {}", self.interface_number, self.alt_setting),
        }
    }
}

/// DFU functional descriptor (DFU 1.1, section 4.1.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionalDescriptor {
    /// `bmAttributes`
    pub attributes: u8,
    /// `wDetachTimeOut` in milliseconds
    pub detach_timeout_ms: u16,
    /// `wTransferSize`, the largest control write the device accepts
    pub transfer_size: u16,
    /// `bcdDFUVersion`, zero when the descriptor is the short DFU 1.0 form
    pub dfu_version: u16,
}

impl FunctionalDescriptor {
    /// Build a descriptor that downloads in `transfer_size` chunks
    pub fn new(transfer_size: u16) -> Self {
        Self {
            attributes: ATTR_CAN_DOWNLOAD,
            detach_timeout_ms: 0,
            transfer_size,
            dfu_version: 0x0110,
        }
    }

    /// Parse a raw descriptor including its length and type header
    ///
    /// Returns `None` for anything that is not a DFU functional descriptor.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let (&length, rest) = raw.split_first()?;
        let (&descriptor_type, body) = rest.split_first()?;
        if descriptor_type != DFU_FUNCTIONAL_DESCRIPTOR_TYPE || length < 7 {
            return None;
        }

        let attributes = *body.first()?;
        let detach_timeout_ms = u16::from_le_bytes([*body.get(1)?, *body.get(2)?]);
        let transfer_size = u16::from_le_bytes([*body.get(3)?, *body.get(4)?]);
        let dfu_version = match (body.get(5), body.get(6)) {
            (Some(&lo), Some(&hi)) if length >= 9 => u16::from_le_bytes([lo, hi]),
            _ => 0,
        };

        Some(Self {
            attributes,
            detach_timeout_ms,
            transfer_size,
            dfu_version,
        })
    }

    /// Device accepts downloads
    pub fn can_download(&self) -> bool {
        self.attributes & ATTR_CAN_DOWNLOAD != 0
    }

    /// Device supports upload (read-back)
    pub fn can_upload(&self) -> bool {
        self.attributes & ATTR_CAN_UPLOAD != 0
    }

    /// Device stays on the bus after manifestation
    pub fn manifestation_tolerant(&self) -> bool {
        self.attributes & ATTR_MANIFESTATION_TOLERANT != 0
    }

    /// Device detaches on its own after a DFU_DETACH
    pub fn will_detach(&self) -> bool {
        self.attributes & ATTR_WILL_DETACH != 0
    }

    /// Mark the device as detaching on its own
    pub fn with_will_detach(mut self, will_detach: bool) -> Self {
        if will_detach {
            self.attributes |= ATTR_WILL_DETACH;
        } else {
            self.attributes &= !ATTR_WILL_DETACH;
        }
        self
    }

    /// Mark the device as manifestation tolerant
    pub fn with_manifestation_tolerant(mut self, tolerant: bool) -> Self {
        if tolerant {
            self.attributes |= ATTR_MANIFESTATION_TOLERANT;
        } else {
            self.attributes &= !ATTR_MANIFESTATION_TOLERANT;
        }
        self
    }
}
