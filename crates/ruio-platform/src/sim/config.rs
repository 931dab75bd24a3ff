use crate::pci::{PCI_CAP_PTR, PCI_STATUS_CAPABILITIES_LIST};

pub(crate) const CONFIG_SPACE_SIZE: usize = 256;

const COMMAND_OFFSET: usize = 0x04;
const STATUS_OFFSET: usize = 0x06;
const INTERRUPT_LINE_OFFSET: usize = 0x3c;
const INTERRUPT_PIN_OFFSET: usize = 0x3d;

/// A Type 0 (endpoint) configuration-space image for the simulated function.
///
/// Only the semantics a driver-side backend needs are modeled: the command/status dword,
/// the capability list pointer, and raw byte access. Writes only land on writable bytes;
/// in particular a 32-bit write covering the command register must not clobber the
/// status half of the dword.
#[derive(Debug, Clone)]
pub struct SimConfigSpace {
    bytes: [u8; CONFIG_SPACE_SIZE],
}

impl SimConfigSpace {
    pub fn new(vendor_id: u16, device_id: u16) -> Self {
        let mut bytes = [0u8; CONFIG_SPACE_SIZE];
        bytes[0x00..0x02].copy_from_slice(&vendor_id.to_le_bytes());
        bytes[0x02..0x04].copy_from_slice(&device_id.to_le_bytes());
        bytes[0x0e] = 0x00; // header type 0
        Self { bytes }
    }

    pub fn command(&self) -> u16 {
        u16::from_le_bytes([self.bytes[COMMAND_OFFSET], self.bytes[COMMAND_OFFSET + 1]])
    }

    pub fn set_command(&mut self, command: u16) {
        self.bytes[COMMAND_OFFSET..COMMAND_OFFSET + 2].copy_from_slice(&command.to_le_bytes());
    }

    pub fn status(&self) -> u16 {
        u16::from_le_bytes([self.bytes[STATUS_OFFSET], self.bytes[STATUS_OFFSET + 1]])
    }

    pub fn set_status_bits(&mut self, bits: u16) {
        let status = self.status() | bits;
        self.bytes[STATUS_OFFSET..STATUS_OFFSET + 2].copy_from_slice(&status.to_le_bytes());
    }

    pub fn clear_status_bits(&mut self, bits: u16) {
        let status = self.status() & !bits;
        self.bytes[STATUS_OFFSET..STATUS_OFFSET + 2].copy_from_slice(&status.to_le_bytes());
    }

    pub fn set_interrupt_line(&mut self, line: u8) {
        self.bytes[INTERRUPT_LINE_OFFSET] = line;
    }

    pub fn set_interrupt_pin(&mut self, pin: u8) {
        self.bytes[INTERRUPT_PIN_OFFSET] = pin;
    }

    /// Installs the first (and in this sim, only) capability at `offset` and links it
    /// into the capability list.
    pub fn install_capability(&mut self, offset: u8, id: u8) {
        let base = usize::from(offset);
        self.bytes[base] = id;
        self.bytes[base + 1] = 0; // end of list
        self.bytes[usize::from(PCI_CAP_PTR)] = offset;
        self.set_status_bits(PCI_STATUS_CAPABILITIES_LIST);
    }

    /// Raw backdoor for capability state synchronization; not a bus access.
    pub fn put_bytes(&mut self, offset: usize, data: &[u8]) {
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn read(&self, offset: u16, size: usize) -> u32 {
        assert!(matches!(size, 1 | 2 | 4));
        let offset = usize::from(offset);
        assert!(offset + size <= CONFIG_SPACE_SIZE);

        let mut value = 0u32;
        for i in 0..size {
            value |= u32::from(self.bytes[offset + i]) << (8 * i);
        }
        value
    }

    pub fn write(&mut self, offset: u16, size: usize, value: u32) {
        assert!(matches!(size, 1 | 2 | 4));
        let offset = usize::from(offset);
        assert!(offset + size <= CONFIG_SPACE_SIZE);

        for i in 0..size {
            let byte_offset = offset + i;
            if Self::byte_writable(byte_offset) {
                self.bytes[byte_offset] = ((value >> (8 * i)) & 0xff) as u8;
            }
        }
    }

    /// Which config bytes accept bus writes. The identity block, status register, and
    /// capability headers are read-only from the driver's point of view; the command
    /// register and the interrupt-line scratch byte are writable.
    fn byte_writable(offset: usize) -> bool {
        matches!(offset, COMMAND_OFFSET | 0x05 | INTERRUPT_LINE_OFFSET)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::SimConfigSpace;
    use crate::pci::{PCI_CAP_ID_MSIX, PCI_STATUS_CAPABILITIES_LIST};

    #[test]
    fn dword_write_to_command_does_not_clobber_status() {
        let mut config = SimConfigSpace::new(0x8086, 0x10c9);
        config.install_capability(0x40, PCI_CAP_ID_MSIX);

        let status_before = config.status();
        assert_ne!(status_before & PCI_STATUS_CAPABILITIES_LIST, 0);

        // A 32-bit write at 0x04 covers both command and status; only command changes.
        config.write(0x04, 4, 0x0000_0406);

        assert_eq!(config.status(), status_before);
        assert_eq!(config.command(), 0x0406);
    }

    #[test]
    fn capability_list_is_discoverable() {
        let mut config = SimConfigSpace::new(0x8086, 0x10c9);
        config.install_capability(0x40, PCI_CAP_ID_MSIX);

        let cap_ptr = config.read(0x34, 1) as u8;
        assert_eq!(cap_ptr, 0x40);
        assert_eq!(config.read(0x40, 1) as u8, PCI_CAP_ID_MSIX);
        assert_eq!(config.read(0x41, 1), 0, "single capability terminates the list");
    }

    #[test]
    fn identity_block_is_read_only() {
        let mut config = SimConfigSpace::new(0x8086, 0x10c9);
        config.write(0x00, 4, 0xffff_ffff);
        assert_eq!(config.read(0x00, 2), 0x8086);
        assert_eq!(config.read(0x02, 2), 0x10c9);
    }
}
