//! Per-device context: attach, steady-state interrupt handling, the user-facing
//! irq-control entry point, and detach.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use ruio_platform::pci::{PCI_COMMAND, PCI_STATUS_INTERRUPT};
use ruio_platform::{IrqDispatcher, IrqFlags, IrqHandler, IrqReturn, PciFunction};

use crate::error::AttachError;
use crate::intr::{self, IntrMode, IntrModeKind, MsixVectorState, PreferredMode};
use crate::regions::{self, RegionInfo, RegionTable};

/// Name under which the driver claims the function's memory regions.
pub const DRIVER_NAME: &str = "ruio";

/// The attach path always negotiates a 32-bit DMA mask. Deliberate simplification;
/// it is not a capability probe.
pub const DMA_MASK_32BIT: u64 = 0xffff_ffff;

/// One attached device.
///
/// The interrupt state (mode plus mask-bit mirrors) is shared between interrupt context
/// (the registered handler) and process context (irqcontrol); both serialize on the
/// context lock, and both take the function's config-space guard *after* it, releasing
/// in reverse order. That fixed global order is load-bearing: it is what makes the two
/// paths deadlock-free.
pub struct UioPciDevice<F: PciFunction + IrqDispatcher> {
    function: Arc<F>,
    intr: Mutex<IntrMode>,
    regions: Mutex<RegionTable>,
    irq_line: u32,
    irq_flags: IrqFlags,
    detached: AtomicBool,
}

impl<F: PciFunction + IrqDispatcher + 'static> UioPciDevice<F> {
    /// Brings the function up and returns the shared device context.
    ///
    /// Stage order: enable, DMA mask, region reservation, bus mastering, BAR0 mapping,
    /// mode selection, initial mask-off, handler registration. Every fatal failure
    /// releases exactly the resources acquired before it, in reverse order; a failed
    /// attach leaves no partial context reachable and nothing registered.
    pub fn attach(function: Arc<F>, preferred: PreferredMode) -> Result<Arc<Self>, AttachError> {
        function.enable().map_err(|_| AttachError::DeviceEnable)?;

        if function.set_dma_mask(DMA_MASK_32BIT).is_err() {
            function.disable();
            return Err(AttachError::DmaMask);
        }

        if function.request_regions(DRIVER_NAME).is_err() {
            function.disable();
            return Err(AttachError::RegionReservation);
        }

        function.set_bus_master(true);

        let mut region_table = regions::empty_table();
        if let Err(err) = regions::map_region(&*function, &mut region_table, 0, 0, "config") {
            function.release_regions();
            function.disable();
            return Err(err);
        }

        let mode = intr::select_mode(&*function, preferred);
        let (irq_line, irq_flags) = match &mode {
            IntrMode::Msix { vectors } => (vectors[0].vector, IrqFlags::empty()),
            // Reserved mode; never chosen by select_mode. Message delivery is not
            // shared, so no SHARED flag.
            IntrMode::Msi => (function.intx_line(), IrqFlags::empty()),
            IntrMode::Legacy => (function.intx_line(), IrqFlags::SHARED),
        };
        let mode_kind = mode.kind();

        let device = Arc::new(Self {
            function: Arc::clone(&function),
            intr: Mutex::new(mode),
            regions: Mutex::new(region_table),
            irq_line,
            irq_flags,
            detached: AtomicBool::new(false),
        });

        // Hand the device over with its interrupt masked; user space re-enables
        // delivery through irqcontrol once it is ready to observe events.
        device.irqcontrol(0);

        let weak = Arc::downgrade(&device);
        let handler: IrqHandler = Arc::new(move || match weak.upgrade() {
            Some(device) => device.handle_irq(),
            None => IrqReturn::NotMine,
        });
        if function
            .register_handler(irq_line, irq_flags, handler)
            .is_err()
        {
            regions::release_all(&*function, &mut device.region_state());
            if matches!(*device.intr_state(), IntrMode::Msix { .. }) {
                function.disable_msix();
            }
            function.release_regions();
            function.disable();
            // Everything is already released; keep Drop from doing it again.
            device.detached.store(true, Ordering::SeqCst);
            return Err(AttachError::HandlerRegistration { line: irq_line });
        }

        info!(mode = ?mode_kind, line = irq_line, "device attached");
        Ok(device)
    }
}

impl<F: PciFunction + IrqDispatcher> UioPciDevice<F> {
    fn intr_state(&self) -> MutexGuard<'_, IntrMode> {
        // A poisoned lock still holds a consistent mirror; keep going.
        self.intr.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn region_state(&self) -> MutexGuard<'_, RegionTable> {
        self.regions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Top-half interrupt handler.
    ///
    /// For shared legacy lines the status interrupt-pending bit decides ownership;
    /// interrupts that are not ours are left alone. Our own interrupts are masked at
    /// the source before returning so a level-triggered line cannot storm between now
    /// and user space servicing the event; re-enabling is user space's job via
    /// [`irqcontrol`](Self::irqcontrol).
    pub fn handle_irq(&self) -> IrqReturn {
        // Context lock first, config-space guard second; released in reverse order.
        let mut mode = self.intr_state();
        let _cfg = self.function.config_lock().lock();

        if matches!(*mode, IntrMode::Legacy) {
            let dword = match self.function.config_read32(PCI_COMMAND) {
                Ok(dword) => dword,
                Err(err) => {
                    warn!(%err, "config read failed in interrupt handler");
                    return IrqReturn::NotMine;
                }
            };
            let status = (dword >> 16) as u16;
            if status & PCI_STATUS_INTERRUPT == 0 {
                debug!(line = self.irq_line, "shared-line interrupt is not ours");
                return IrqReturn::NotMine;
            }
        }

        if let Err(err) = intr::set_mask(&mut mode, &*self.function, false) {
            warn!(%err, "masking interrupt source failed");
        }
        debug!(line = self.irq_line, "interrupt handled and masked");
        IrqReturn::Handled
    }

    /// The irq-control entry point exposed to user space: a 4-byte enable/disable
    /// value, nonzero to re-enable interrupt delivery after servicing, zero to mask it.
    ///
    /// Synchronous and bounded; a transient config-space failure is logged and the
    /// mask state is simply left unchanged, matching bus semantics.
    pub fn irqcontrol(&self, value: i32) {
        let enable = value != 0;
        let mut mode = self.intr_state();
        let _cfg = self.function.config_lock().lock();
        if let Err(err) = intr::set_mask(&mut mode, &*self.function, enable) {
            warn!(%err, enable, "irqcontrol mask update not applied");
        }
    }

    /// Which signalling mode attach settled on. Fixed for the context's lifetime.
    pub fn mode(&self) -> IntrModeKind {
        self.intr_state().kind()
    }

    /// Snapshot of the MSI-X vector mirrors; `None` outside MSI-X mode.
    pub fn msix_vectors(&self) -> Option<Vec<MsixVectorState>> {
        match &*self.intr_state() {
            IntrMode::Msix { vectors } => Some(vectors.clone()),
            _ => None,
        }
    }

    /// The line or vector number the handler is registered on.
    pub fn irq_line(&self) -> u32 {
        self.irq_line
    }

    pub fn irq_flags(&self) -> IrqFlags {
        self.irq_flags
    }

    /// Description of the mapped region in `slot`, if populated.
    pub fn region(&self, slot: usize) -> Option<RegionInfo> {
        self.region_state()
            .get(slot)
            .and_then(|slot| slot.as_ref().map(|region| region.info()))
    }

    /// Tears the device down. Unconditional and idempotent.
    ///
    /// The handler is unregistered first (after that returns, no handler invocation is
    /// in flight and none will start), then mappings, MSI-X vectors, region
    /// reservations, and the device enable are released in reverse acquisition order.
    pub fn detach(&self) {
        if self.detached.swap(true, Ordering::SeqCst) {
            return;
        }
        self.function.unregister_handler(self.irq_line);
        regions::release_all(&*self.function, &mut self.region_state());
        if matches!(*self.intr_state(), IntrMode::Msix { .. }) {
            self.function.disable_msix();
        }
        self.function.release_regions();
        self.function.disable();
        info!(line = self.irq_line, "device detached");
    }
}

impl<F: PciFunction + IrqDispatcher> Drop for UioPciDevice<F> {
    fn drop(&mut self) {
        self.detach();
    }
}

impl<F: PciFunction + IrqDispatcher> core::fmt::Debug for UioPciDevice<F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UioPciDevice")
            .field("mode", &self.intr_state().kind())
            .field("line", &self.irq_line)
            .field("flags", &self.irq_flags)
            .finish_non_exhaustive()
    }
}
