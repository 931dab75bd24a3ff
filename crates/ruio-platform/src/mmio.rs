use std::sync::Arc;

/// Storage behind a mapped device memory range.
///
/// On a real host this is a volatile view of an ioremapped physical range; accesses must
/// not be elided, reordered, or widened. The simulated backend implements it over plain
/// byte storage.
pub trait MmioBacking: Send + Sync {
    fn read32(&self, offset: u64) -> u32;
    fn write32(&self, offset: u64, value: u32);
}

/// A mapped view of one device memory range.
///
/// A window is either fully usable (base, length, and backing all present) or does not
/// exist at all; there is no partially-mapped state. Dropping a window does *not* undo
/// the mapping; unmapping is an explicit operation on the owning
/// [`PciFunction`](crate::pci::PciFunction), mirroring how the mapping was requested.
#[derive(Clone)]
pub struct MmioWindow {
    phys: u64,
    len: u64,
    backing: Arc<dyn MmioBacking>,
}

impl MmioWindow {
    pub fn new(phys: u64, len: u64, backing: Arc<dyn MmioBacking>) -> Self {
        assert!(len > 0, "MMIO window must have a non-zero length");
        Self { phys, len, backing }
    }

    /// Physical base address of the mapped range.
    pub fn phys(&self) -> u64 {
        self.phys
    }

    /// Length of the mapped range in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn read32(&self, offset: u64) -> u32 {
        assert!(
            offset
                .checked_add(4)
                .is_some_and(|end| end <= self.len),
            "MMIO read of 4 bytes at {offset:#x} outside window of {:#x} bytes",
            self.len
        );
        self.backing.read32(offset)
    }

    pub fn write32(&self, offset: u64, value: u32) {
        assert!(
            offset
                .checked_add(4)
                .is_some_and(|end| end <= self.len),
            "MMIO write of 4 bytes at {offset:#x} outside window of {:#x} bytes",
            self.len
        );
        self.backing.write32(offset, value);
    }
}

impl core::fmt::Debug for MmioWindow {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MmioWindow")
            .field("phys", &format_args!("{:#x}", self.phys))
            .field("len", &format_args!("{:#x}", self.len))
            .finish_non_exhaustive()
    }
}
