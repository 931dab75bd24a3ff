use crate::pci::{MSIX_ENTRY_CTRL_MASKBIT, MSIX_ENTRY_SIZE, MSIX_ENTRY_VECTOR_CTRL, PCI_CAP_ID_MSIX};
use crate::sim::config::SimConfigSpace;

/// MSI-X capability state for the simulated function: the message-control word plus the
/// raw vector table (16 bytes per entry, little-endian, mask bit is bit 0 of the
/// vector-control word at entry offset 12).
#[derive(Debug, Clone)]
pub struct SimMsix {
    offset: u8,
    table_size: u16,
    enabled: bool,
    table: Vec<u8>,
}

impl SimMsix {
    pub fn new(offset: u8, table_size: u16) -> Self {
        assert!(table_size > 0, "MSI-X table size must be non-zero");
        Self {
            offset,
            table_size,
            enabled: false,
            table: vec![0u8; usize::from(table_size) * MSIX_ENTRY_SIZE as usize],
        }
    }

    pub fn table_size(&self) -> u16 {
        self.table_size
    }

    pub fn table_len_bytes(&self) -> u64 {
        self.table.len() as u64
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn message_control(&self) -> u16 {
        let mut ctrl = (self.table_size - 1) & 0x07ff;
        if self.enabled {
            ctrl |= 1 << 15;
        }
        ctrl
    }

    /// Mirrors capability state into the config-space image (capability header plus the
    /// table/PBA location dwords; table lives in BAR0 at offset 0, PBA behind it).
    pub fn sync_to_config(&self, config: &mut SimConfigSpace) {
        let base = usize::from(self.offset);
        config.install_capability(self.offset, PCI_CAP_ID_MSIX);
        config.put_bytes(base + 0x02, &self.message_control().to_le_bytes());
        config.put_bytes(base + 0x04, &0u32.to_le_bytes()); // table: BIR 0, offset 0
        let pba = (self.table_len_bytes() as u32) & !0x7;
        config.put_bytes(base + 0x08, &pba.to_le_bytes());
    }

    pub fn read32(&self, offset: u64) -> u32 {
        let start = offset as usize;
        assert!(start + 4 <= self.table.len());
        u32::from_le_bytes(self.table[start..start + 4].try_into().unwrap())
    }

    pub fn write32(&mut self, offset: u64, value: u32) {
        let start = offset as usize;
        assert!(start + 4 <= self.table.len());
        self.table[start..start + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn entry_control(&self, entry: u16) -> u32 {
        assert!(entry < self.table_size);
        self.read32(u64::from(entry) * MSIX_ENTRY_SIZE + MSIX_ENTRY_VECTOR_CTRL)
    }

    pub fn entry_masked(&self, entry: u16) -> bool {
        self.entry_control(entry) & MSIX_ENTRY_CTRL_MASKBIT != 0
    }
}
