//! User-space I/O driver core for PCI devices.
//!
//! Exposes one PCI function's memory regions and interrupt line to an unprivileged
//! consumer while keeping the kernel-side pieces that must stay serialized: interrupt
//! masking and configuration-space access. The hard part is the interrupt-mode state
//! machine (one of legacy INTx, MSI, or MSI-X is selected per device at attach) and
//! the mask/unmask protocol that lets user space safely re-enable an interrupt after
//! servicing it without racing the hardware or a concurrent config-space access.
//!
//! The host side (bus primitives, interrupt dispatch, mapping) is consumed through the
//! traits in [`ruio_platform`]; this crate contains only driver logic:
//!
//! - [`intr`]: mode selection and the mask controller
//! - [`device`]: the per-device context, top-half handler, irqcontrol, attach/detach
//! - [`regions`]: mapped-region lifecycle shared by unwind and detach
//! - [`driver`]: the owned registration object and probe/remove entry points
//! - [`ids`]: the static claim table

pub mod device;
pub mod driver;
pub mod error;
pub mod ids;
pub mod intr;
pub mod regions;

pub use device::{UioPciDevice, DMA_MASK_32BIT, DRIVER_NAME};
pub use driver::DriverRegistration;
pub use error::{AttachError, ProbeError};
pub use intr::{IntrMode, IntrModeKind, MsixVectorState, PreferredMode};
pub use regions::{RegionInfo, MAX_MAPS};
