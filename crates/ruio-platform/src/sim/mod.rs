//! A software PCI function.
//!
//! [`SimPciFunction`] implements [`PciFunction`] and [`IrqDispatcher`] over an in-memory
//! config space and MSI-X table, with per-primitive fault injection and enough
//! observability (write counters, outstanding-resource accounting) for tests to assert
//! masking idempotence and attach-unwind completeness.

mod config;
mod msix;

use std::sync::{Arc, Mutex, MutexGuard};

use crate::irq::{IrqDispatcher, IrqError, IrqFlags, IrqHandler, IrqReturn};
use crate::mmio::{MmioBacking, MmioWindow};
use crate::pci::{
    BarRange, BusError, ConfigLock, MapError, MsixAllocError, MsixVector, PciFunction,
    PciIoError, PciVendorDeviceId, PCI_COMMAND_BUS_MASTER, PCI_STATUS_INTERRUPT,
};

pub use config::SimConfigSpace;
pub use msix::SimMsix;

/// Platform-assigned vector numbers for granted MSI-X entries start here. Arbitrary, but
/// distinct from typical INTx lines so tests can tell them apart.
const MSIX_VECTOR_BASE: u32 = 0x30;

const MSIX_CAP_OFFSET: u8 = 0x40;

/// Which primitives should fail. All clear by default.
#[derive(Debug, Default, Copy, Clone)]
pub struct FaultPlan {
    pub enable: bool,
    pub dma_mask: bool,
    pub regions: bool,
    pub map_bar: [bool; 6],
    pub msix: bool,
    pub irq_register: bool,
    /// Fail every config-space read/write with a transient I/O error.
    pub config_io: bool,
}

/// Construction parameters for a simulated function.
#[derive(Debug, Clone)]
pub struct SimFunctionConfig {
    pub id: PciVendorDeviceId,
    pub bars: [Option<BarRange>; 6],
    /// MSI-X table size; 0 means the capability is absent.
    pub msix_vectors: u16,
    pub intx_line: u32,
    pub faults: FaultPlan,
}

impl Default for SimFunctionConfig {
    fn default() -> Self {
        Self {
            id: PciVendorDeviceId::new(0x8086, 0x10c9),
            bars: [
                Some(BarRange {
                    base: 0xfeb0_0000,
                    len: 0x1000,
                }),
                None,
                None,
                None,
                None,
                None,
            ],
            msix_vectors: 1,
            intx_line: 11,
            faults: FaultPlan::default(),
        }
    }
}

/// Snapshot of everything a driver currently holds on the function. Used by unwind
/// tests: after a failed attach or a completed detach every field must be back to its
/// released state.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct OutstandingResources {
    pub enabled: bool,
    pub bus_master: bool,
    pub regions_claimed: bool,
    pub msix_enabled: bool,
    pub mappings: usize,
    pub handler_registered: bool,
}

struct RegisteredHandler {
    line: u32,
    flags: IrqFlags,
    handler: IrqHandler,
}

struct SimState {
    config: SimConfigSpace,
    msix: Option<SimMsix>,
    bars: [Option<BarRange>; 6],
    bar_mem: [Option<Vec<u8>>; 6],
    faults: FaultPlan,

    enabled: bool,
    bus_master: bool,
    dma_mask: Option<u64>,
    regions_claimed_by: Option<String>,
    msix_granted: Vec<MsixVector>,
    mappings: usize,
    handler: Option<RegisteredHandler>,

    config_writes: usize,
    table_reads: usize,
    table_writes: usize,
}

/// A software PCI function; the backend used by the test suites.
pub struct SimPciFunction {
    id: PciVendorDeviceId,
    intx_line: u32,
    state: Arc<Mutex<SimState>>,
    config_lock: ConfigLock,
}

impl SimPciFunction {
    pub fn new(cfg: SimFunctionConfig) -> Arc<Self> {
        let mut config = SimConfigSpace::new(cfg.id.vendor_id, cfg.id.device_id);
        config.set_interrupt_pin(1); // INTA#
        config.set_interrupt_line(cfg.intx_line as u8);

        let msix = (cfg.msix_vectors > 0).then(|| {
            let msix = SimMsix::new(MSIX_CAP_OFFSET, cfg.msix_vectors);
            msix.sync_to_config(&mut config);
            msix
        });

        Arc::new(Self {
            id: cfg.id,
            intx_line: cfg.intx_line,
            state: Arc::new(Mutex::new(SimState {
                config,
                msix,
                bars: cfg.bars,
                bar_mem: Default::default(),
                faults: cfg.faults,
                enabled: false,
                bus_master: false,
                dma_mask: None,
                regions_claimed_by: None,
                msix_granted: Vec::new(),
                mappings: 0,
                handler: None,
                config_writes: 0,
                table_reads: 0,
                table_writes: 0,
            })),
            config_lock: ConfigLock::new(),
        })
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replaces the fault plan; takes effect for subsequent primitive calls.
    pub fn set_faults(&self, faults: FaultPlan) {
        self.state().faults = faults;
    }

    pub fn command(&self) -> u16 {
        self.state().config.command()
    }

    pub fn intx_disabled(&self) -> bool {
        self.command() & crate::pci::PCI_COMMAND_INTX_DISABLE != 0
    }

    /// Drives the function's status interrupt-pending bit, as the hardware would when
    /// asserting (or dropping) its INTx line.
    pub fn set_status_interrupt(&self, pending: bool) {
        let mut state = self.state();
        if pending {
            state.config.set_status_bits(PCI_STATUS_INTERRUPT);
        } else {
            state.config.clear_status_bits(PCI_STATUS_INTERRUPT);
        }
    }

    pub fn vector_control(&self, entry: u16) -> u32 {
        self.state()
            .msix
            .as_ref()
            .expect("function has no MSI-X capability")
            .entry_control(entry)
    }

    pub fn vector_masked(&self, entry: u16) -> bool {
        self.state()
            .msix
            .as_ref()
            .expect("function has no MSI-X capability")
            .entry_masked(entry)
    }

    pub fn config_write_count(&self) -> usize {
        self.state().config_writes
    }

    pub fn table_write_count(&self) -> usize {
        self.state().table_writes
    }

    pub fn table_read_count(&self) -> usize {
        self.state().table_reads
    }

    pub fn dma_mask(&self) -> Option<u64> {
        self.state().dma_mask
    }

    pub fn registered_handler(&self) -> Option<(u32, IrqFlags)> {
        self.state().handler.as_ref().map(|h| (h.line, h.flags))
    }

    pub fn outstanding(&self) -> OutstandingResources {
        let state = self.state();
        OutstandingResources {
            enabled: state.enabled,
            bus_master: state.bus_master,
            regions_claimed: state.regions_claimed_by.is_some(),
            msix_enabled: state.msix.as_ref().is_some_and(|m| m.enabled()),
            mappings: state.mappings,
            handler_registered: state.handler.is_some(),
        }
    }

    /// Invokes the registered handler, if any, the way the host dispatcher would.
    /// Returns the handler's verdict.
    pub fn trigger(&self) -> Option<IrqReturn> {
        // Clone the handler out and drop the state lock first: the handler will come
        // back into this function for config and table accesses.
        let handler = {
            let state = self.state();
            state.handler.as_ref().map(|h| Arc::clone(&h.handler))
        };
        handler.map(|h| h())
    }

    /// Asserts the function's own legacy interrupt: raises the status pending bit, then
    /// invokes the registered handler.
    pub fn raise_intx(&self) -> Option<IrqReturn> {
        self.set_status_interrupt(true);
        self.trigger()
    }
}

impl PciFunction for SimPciFunction {
    fn vendor_device(&self) -> PciVendorDeviceId {
        self.id
    }

    fn config_lock(&self) -> &ConfigLock {
        &self.config_lock
    }

    fn config_read32(&self, offset: u16) -> Result<u32, PciIoError> {
        let state = self.state();
        if state.faults.config_io {
            return Err(PciIoError { offset });
        }
        Ok(state.config.read(offset, 4))
    }

    fn config_write16(&self, offset: u16, value: u16) -> Result<(), PciIoError> {
        let mut state = self.state();
        if state.faults.config_io {
            return Err(PciIoError { offset });
        }
        state.config_writes += 1;
        state.config.write(offset, 2, u32::from(value));
        Ok(())
    }

    fn config_write32(&self, offset: u16, value: u32) -> Result<(), PciIoError> {
        let mut state = self.state();
        if state.faults.config_io {
            return Err(PciIoError { offset });
        }
        state.config_writes += 1;
        state.config.write(offset, 4, value);
        Ok(())
    }

    fn enable(&self) -> Result<(), BusError> {
        let mut state = self.state();
        if state.faults.enable {
            return Err(BusError::EnableRejected);
        }
        state.enabled = true;
        Ok(())
    }

    fn disable(&self) {
        let mut state = self.state();
        state.enabled = false;
        state.bus_master = false;
        let command = state.config.command() & !PCI_COMMAND_BUS_MASTER;
        state.config.set_command(command);
    }

    fn set_dma_mask(&self, mask: u64) -> Result<(), BusError> {
        let mut state = self.state();
        if state.faults.dma_mask {
            return Err(BusError::DmaMaskRejected { mask });
        }
        state.dma_mask = Some(mask);
        Ok(())
    }

    fn request_regions(&self, name: &str) -> Result<(), BusError> {
        let mut state = self.state();
        if state.faults.regions || state.regions_claimed_by.is_some() {
            return Err(BusError::RegionsBusy);
        }
        state.regions_claimed_by = Some(name.to_owned());
        Ok(())
    }

    fn release_regions(&self) {
        self.state().regions_claimed_by = None;
    }

    fn set_bus_master(&self, enable: bool) {
        let mut state = self.state();
        state.bus_master = enable;
        let mut command = state.config.command();
        if enable {
            command |= PCI_COMMAND_BUS_MASTER;
        } else {
            command &= !PCI_COMMAND_BUS_MASTER;
        }
        state.config.set_command(command);
    }

    fn enable_msix(&self, count: u16) -> Result<Vec<MsixVector>, MsixAllocError> {
        let mut state = self.state();
        if state.faults.msix {
            return Err(MsixAllocError { requested: count });
        }
        let Some(msix) = state.msix.as_mut() else {
            return Err(MsixAllocError { requested: count });
        };
        if count == 0 || count > msix.table_size() || msix.enabled() {
            return Err(MsixAllocError { requested: count });
        }

        msix.set_enabled(true);
        let granted: Vec<MsixVector> = (0..count)
            .map(|entry| MsixVector {
                entry,
                vector: MSIX_VECTOR_BASE + u32::from(entry),
            })
            .collect();
        state.msix_granted = granted.clone();

        let msix = state.msix.take();
        if let Some(msix) = msix {
            msix.sync_to_config(&mut state.config);
            state.msix = Some(msix);
        }
        Ok(granted)
    }

    fn disable_msix(&self) {
        let mut state = self.state();
        state.msix_granted.clear();
        let msix = state.msix.take();
        if let Some(mut msix) = msix {
            msix.set_enabled(false);
            msix.sync_to_config(&mut state.config);
            state.msix = Some(msix);
        }
    }

    fn msix_table(&self) -> Option<MmioWindow> {
        let state = self.state();
        let msix = state.msix.as_ref()?;
        let phys = state.bars[0].map(|bar| bar.base).unwrap_or(0);
        Some(MmioWindow::new(
            phys,
            msix.table_len_bytes(),
            Arc::new(MsixTableBacking {
                state: Arc::clone(&self.state),
            }),
        ))
    }

    fn bar(&self, index: u8) -> Option<BarRange> {
        self.state().bars.get(usize::from(index)).copied().flatten()
    }

    fn map_bar(&self, index: u8) -> Result<MmioWindow, MapError> {
        let mut state = self.state();
        let bar = state
            .bars
            .get(usize::from(index))
            .copied()
            .flatten()
            .unwrap_or(BarRange { base: 0, len: 0 });
        if state.faults.map_bar[usize::from(index)] || !bar.is_present() {
            return Err(MapError {
                phys: bar.base,
                len: bar.len,
            });
        }

        let slot = usize::from(index);
        if state.bar_mem[slot].is_none() {
            state.bar_mem[slot] = Some(vec![0u8; bar.len as usize]);
        }
        state.mappings += 1;
        Ok(MmioWindow::new(
            bar.base,
            bar.len,
            Arc::new(BarBacking {
                state: Arc::clone(&self.state),
                bar: slot,
            }),
        ))
    }

    fn unmap(&self, _window: MmioWindow) {
        let mut state = self.state();
        state.mappings = state.mappings.saturating_sub(1);
    }

    fn intx_line(&self) -> u32 {
        self.intx_line
    }
}

impl IrqDispatcher for SimPciFunction {
    fn register_handler(
        &self,
        line: u32,
        flags: IrqFlags,
        handler: IrqHandler,
    ) -> Result<(), IrqError> {
        let mut state = self.state();
        if state.faults.irq_register {
            return Err(IrqError::Rejected { line });
        }
        if state.handler.is_some() {
            return Err(IrqError::LineBusy { line });
        }
        state.handler = Some(RegisteredHandler {
            line,
            flags,
            handler,
        });
        Ok(())
    }

    fn unregister_handler(&self, line: u32) {
        let mut state = self.state();
        if state.handler.as_ref().is_some_and(|h| h.line == line) {
            state.handler = None;
        }
    }
}

/// MMIO view of the MSI-X vector table. Accesses count as device MMIO for the test
/// counters; a read doubles as a posted-write flush.
struct MsixTableBacking {
    state: Arc<Mutex<SimState>>,
}

impl MmioBacking for MsixTableBacking {
    fn read32(&self, offset: u64) -> u32 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.table_reads += 1;
        state
            .msix
            .as_ref()
            .map(|m| m.read32(offset))
            .unwrap_or(0)
    }

    fn write32(&self, offset: u64, value: u32) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.table_writes += 1;
        if let Some(msix) = state.msix.as_mut() {
            msix.write32(offset, value);
        }
    }
}

/// MMIO view of a mapped BAR; plain scratch storage in the sim.
struct BarBacking {
    state: Arc<Mutex<SimState>>,
    bar: usize,
}

impl MmioBacking for BarBacking {
    fn read32(&self, offset: u64) -> u32 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(mem) = state.bar_mem[self.bar].as_ref() else {
            return 0;
        };
        let start = offset as usize;
        u32::from_le_bytes(mem[start..start + 4].try_into().unwrap())
    }

    fn write32(&self, offset: u64, value: u32) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mem) = state.bar_mem[self.bar].as_mut() {
            let start = offset as usize;
            mem[start..start + 4].copy_from_slice(&value.to_le_bytes());
        }
    }
}
