//! Host-platform collaborator surface for the ruio driver core.
//!
//! The driver core in `ruio-pci` never talks to a bus directly; everything it needs from
//! the host is expressed here as traits with small, documented contracts:
//!
//! - [`pci::PciFunction`]: one PCI function with serialized config-space access, BAR
//!   discovery and mapping, MSI-X vector allocation, and the per-device config-space
//!   lock.
//! - [`irq::IrqDispatcher`]: interrupt-handler registration with a strict
//!   no-in-flight-after-unregister guarantee.
//!
//! The [`sim`] module provides a complete software PCI function implementing both
//! traits, with per-primitive fault injection. It is the backend used by the test
//! suites and by consumers that want to exercise driver logic without hardware.

pub mod irq;
pub mod mmio;
pub mod pci;
pub mod sim;

pub use irq::{IrqDispatcher, IrqError, IrqFlags, IrqHandler, IrqReturn};
pub use mmio::{MmioBacking, MmioWindow};
pub use pci::{
    BarRange, BusError, ConfigGuard, ConfigLock, MapError, MsixAllocError, MsixVector,
    PciFunction, PciIoError, PciVendorDeviceId,
};
