//! The PCI function as seen by a driver, plus the register-level constants the driver
//! core needs to manipulate the command/status dword and the MSI-X vector table.

use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

use crate::mmio::MmioWindow;

/// Byte offset of the command register; the status register occupies the upper half of
/// the same 32-bit dword.
pub const PCI_COMMAND: u16 = 0x04;

/// Command-register bit that gates delivery of legacy INTx interrupts (set = disabled).
pub const PCI_COMMAND_INTX_DISABLE: u16 = 1 << 10;
pub const PCI_COMMAND_BUS_MASTER: u16 = 1 << 2;

/// Status-register bit indicating this function currently has an interrupt pending.
/// On shared legacy lines this is the only cheap ownership test available.
pub const PCI_STATUS_INTERRUPT: u16 = 1 << 3;
pub const PCI_STATUS_CAPABILITIES_LIST: u16 = 1 << 4;

pub const PCI_CAP_PTR: u16 = 0x34;
pub const PCI_CAP_ID_MSIX: u8 = 0x11;

/// MSI-X vector table layout: 16 bytes per entry, the per-vector mask bit is bit 0 of
/// the vector-control word at entry offset 12.
pub const MSIX_ENTRY_SIZE: u64 = 16;
pub const MSIX_ENTRY_LOWER_ADDR: u64 = 0;
pub const MSIX_ENTRY_UPPER_ADDR: u64 = 4;
pub const MSIX_ENTRY_DATA: u64 = 8;
pub const MSIX_ENTRY_VECTOR_CTRL: u64 = 12;
pub const MSIX_ENTRY_CTRL_MASKBIT: u32 = 1 << 0;

/// (vendor id, device id) identity of a PCI function.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct PciVendorDeviceId {
    pub vendor_id: u16,
    pub device_id: u16,
}

impl PciVendorDeviceId {
    pub const fn new(vendor_id: u16, device_id: u16) -> Self {
        Self {
            vendor_id,
            device_id,
        }
    }
}

/// Bus-assigned base and length of one BAR.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BarRange {
    pub base: u64,
    pub len: u64,
}

impl BarRange {
    /// A BAR that reads back with no base or no length is absent/unimplemented.
    pub fn is_present(&self) -> bool {
        self.base != 0 && self.len != 0
    }
}

/// One allocated MSI-X vector: the table entry it is bound to and the platform-assigned
/// vector number a handler can be registered on.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MsixVector {
    pub entry: u16,
    pub vector: u32,
}

/// A config-space access the bus reported as failed.
///
/// These are transient by contract: the device stays usable and the caller is expected
/// to log and carry on, matching how config-space errors behave on real buses.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
#[error("PCI config-space access failed at offset {offset:#04x}")]
pub struct PciIoError {
    pub offset: u16,
}

/// The bus rejected one of the attach-time primitives.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum BusError {
    #[error("bus refused to enable the device")]
    EnableRejected,
    #[error("DMA mask {mask:#x} not accepted")]
    DmaMaskRejected { mask: u64 },
    #[error("memory regions already claimed by another driver")]
    RegionsBusy,
}

/// MSI-X vector allocation failed (capability absent, table too small, or the platform
/// is out of vectors). Non-fatal by contract: callers fall back to another mode.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
#[error("cannot allocate {requested} MSI-X vector(s)")]
pub struct MsixAllocError {
    pub requested: u16,
}

/// The mapping primitive could not satisfy a BAR mapping request.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
#[error("cannot map {len:#x} bytes at {phys:#x}")]
pub struct MapError {
    pub phys: u64,
    pub len: u64,
}

/// Serializes configuration-space access to one function.
///
/// Config space is a single shared resource: other drivers and user-space tools may
/// issue accesses at any time, and an unguarded read-modify-write of the command
/// register could corrupt unrelated bits. Every config read/write sequence must run
/// under this lock. Callers that also hold a driver-side state lock must acquire that
/// lock *first* and this guard *second* (and release in reverse order); that fixed
/// global order is what keeps the interrupt handler and control-request paths from
/// deadlocking against each other.
pub struct ConfigLock {
    inner: Mutex<()>,
}

impl ConfigLock {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(()),
        }
    }

    pub fn lock(&self) -> ConfigGuard<'_> {
        ConfigGuard {
            _held: self.inner.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }
}

impl Default for ConfigLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Held for the duration of a config-space critical section.
pub struct ConfigGuard<'a> {
    _held: MutexGuard<'a, ()>,
}

/// One PCI function as seen by a driver.
///
/// Implementations are *backends*: the [`sim`](crate::sim) module provides a software
/// backend; a host-OS binding would provide another. All methods take `&self`: a
/// function handle is shared between process-context control paths and the interrupt
/// handler.
pub trait PciFunction: Send + Sync {
    /// Identity used to match the function against a driver's claim table.
    fn vendor_device(&self) -> PciVendorDeviceId;

    /// The per-function config-space lock. See [`ConfigLock`] for the ordering rules.
    fn config_lock(&self) -> &ConfigLock;

    fn config_read32(&self, offset: u16) -> Result<u32, PciIoError>;
    fn config_write16(&self, offset: u16, value: u16) -> Result<(), PciIoError>;
    fn config_write32(&self, offset: u16, value: u32) -> Result<(), PciIoError>;

    /// Asks the bus to enable I/O and memory decoding for the function.
    fn enable(&self) -> Result<(), BusError>;

    /// Disables the function; also clears bus mastering. Safe to call when not enabled.
    fn disable(&self);

    fn set_dma_mask(&self, mask: u64) -> Result<(), BusError>;

    /// Reserves the function's memory regions for exclusive use by the named driver.
    fn request_regions(&self, name: &str) -> Result<(), BusError>;

    /// Releases a prior reservation. Safe to call without one.
    fn release_regions(&self);

    fn set_bus_master(&self, enable: bool);

    /// Allocates `count` MSI-X vectors bound to table entries `0..count`.
    ///
    /// On failure any partial allocation is the caller's to release via
    /// [`disable_msix`](Self::disable_msix).
    fn enable_msix(&self, count: u16) -> Result<Vec<MsixVector>, MsixAllocError>;

    /// Releases all MSI-X vectors. Safe to call when none are allocated.
    fn disable_msix(&self);

    /// The mapped MSI-X vector table, when the function exposes the capability.
    /// Reads from offset 0 double as posted-write flushes for preceding table writes.
    fn msix_table(&self) -> Option<MmioWindow>;

    /// Bus-assigned range of the given BAR, `None` when out of range.
    fn bar(&self, index: u8) -> Option<BarRange>;

    /// Maps the given BAR's physical range into the kernel address space.
    fn map_bar(&self, index: u8) -> Result<MmioWindow, MapError>;

    /// Releases a mapping previously produced by [`map_bar`](Self::map_bar).
    fn unmap(&self, window: MmioWindow);

    /// The function's native legacy interrupt line.
    fn intx_line(&self) -> u32;
}
