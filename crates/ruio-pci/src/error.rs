use thiserror::Error;

pub type Result<T> = std::result::Result<T, AttachError>;

/// Fatal attach failures.
///
/// Each variant maps to one attach stage; the attach path releases exactly the
/// resources acquired before the failing stage, in reverse acquisition order, so a
/// failed attach leaves nothing reachable.
///
/// MSI-X allocation failure is deliberately *not* here: it falls back to legacy line
/// mode instead of aborting the attach. Transient config-space I/O failures during mask
/// operations are logged and swallowed (see [`PciIoError`](ruio_platform::PciIoError)),
/// matching how config-space errors behave on real buses.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum AttachError {
    #[error("cannot enable PCI device")]
    DeviceEnable,
    #[error("cannot set 32-bit DMA mask")]
    DmaMask,
    #[error("cannot reserve PCI memory regions")]
    RegionReservation,
    #[error("BAR{bar} is absent or has zero length")]
    InvalidResource { bar: u8 },
    #[error("cannot map BAR{bar}")]
    MapFailed { bar: u8 },
    #[error("cannot register interrupt handler on line {line}")]
    HandlerRegistration { line: u32 },
}

/// Probe-time failures: either the function is not in the driver's claim table, or the
/// attach itself failed.
#[derive(Debug, Error, Copy, Clone, Eq, PartialEq)]
pub enum ProbeError {
    #[error("device {vendor_id:04x}:{device_id:04x} is not claimed by this driver")]
    NotClaimed { vendor_id: u16, device_id: u16 },
    #[error(transparent)]
    Attach(#[from] AttachError),
}
