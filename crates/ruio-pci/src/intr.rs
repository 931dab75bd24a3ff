//! Interrupt mode selection and the mask controller.
//!
//! A device signals through exactly one of three mutually exclusive modes, chosen once
//! at attach and never revisited. The mask controller knows, per mode, which bit gates
//! the source: the per-vector mask bit in the MSI-X table, or the INTx-disable bit in
//! the command register. Every mask-bit mutation keeps an in-memory mirror in sync with
//! hardware, and a hardware write is only authoritative after a read-back flush.

use tracing::warn;

use ruio_platform::pci::{
    MSIX_ENTRY_CTRL_MASKBIT, MSIX_ENTRY_SIZE, MSIX_ENTRY_VECTOR_CTRL, PCI_COMMAND,
    PCI_COMMAND_INTX_DISABLE,
};
use ruio_platform::{MsixVector, PciFunction, PciIoError};

/// How many MSI-X vectors the driver asks for: a single vector bound to table entry 0.
pub const MSIX_VECTOR_COUNT: u16 = 1;

/// The mode a caller would like; selection falls back from here.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PreferredMode {
    Legacy,
    Msi,
    Msix,
}

/// Mirror of one allocated MSI-X vector.
#[derive(Debug, Clone)]
pub struct MsixVectorState {
    /// Index of the vector's entry in the MSI-X table.
    pub entry: u16,
    /// Platform-assigned vector number; the handler is registered on this.
    pub vector: u32,
    /// Mirror of the entry's vector-control word. Only updated after the posted write
    /// to hardware has been flushed by a read-back, so it never runs ahead of the
    /// device.
    control: u32,
}

impl MsixVectorState {
    fn new(vector: MsixVector) -> Self {
        Self {
            entry: vector.entry,
            vector: vector.vector,
            control: 0,
        }
    }

    pub fn masked(&self) -> bool {
        self.control & MSIX_ENTRY_CTRL_MASKBIT != 0
    }
}

/// The active signalling mode. The vector table only exists in the `Msix` variant, so
/// non-MSI-X code cannot touch vector state that was never allocated.
#[derive(Debug)]
pub enum IntrMode {
    /// Line-based INTx; the line may be shared with other devices.
    Legacy,
    /// Message-signalled, single message. Recognized for explicit configuration and
    /// forward extension; never chosen by [`select_mode`], and masking is a no-op.
    Msi,
    Msix { vectors: Vec<MsixVectorState> },
}

/// Discriminant-only view of [`IntrMode`] for callers that just want to know which mode
/// won.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IntrModeKind {
    Legacy,
    Msi,
    Msix,
}

impl IntrMode {
    pub fn kind(&self) -> IntrModeKind {
        match self {
            IntrMode::Legacy => IntrModeKind::Legacy,
            IntrMode::Msi => IntrModeKind::Msi,
            IntrMode::Msix { .. } => IntrModeKind::Msix,
        }
    }
}

/// Picks the signalling mode for a freshly attached function.
///
/// Tries MSI-X first when preferred: exactly [`MSIX_VECTOR_COUNT`] vector bound to
/// entry 0. Any allocation failure releases the partial allocation and falls back to
/// legacy line mode, which is always available; selection itself cannot fail. Runs
/// exactly once per attach; the result is immutable until detach.
pub fn select_mode<F: PciFunction>(function: &F, preferred: PreferredMode) -> IntrMode {
    if preferred == PreferredMode::Msix {
        match function.enable_msix(MSIX_VECTOR_COUNT) {
            Ok(vectors) if !vectors.is_empty() => {
                return IntrMode::Msix {
                    vectors: vectors.into_iter().map(MsixVectorState::new).collect(),
                };
            }
            Ok(_) | Err(_) => {
                // Release whatever part of the allocation went through before falling
                // back.
                function.disable_msix();
                warn!("MSI-X allocation failed, falling back to legacy interrupts");
            }
        }
    }
    IntrMode::Legacy
}

/// Masks (`enable = false`) or unmasks (`enable = true`) the device's interrupt source.
///
/// Callers must hold the device-context lock and the config-space guard, in that order.
/// Idempotent against the mirror: when the desired state already matches, no hardware
/// access is issued at all. A transient config-space failure leaves the operation
/// unapplied and is reported to the caller; it is not fatal to the device.
pub fn set_mask<F: PciFunction>(
    mode: &mut IntrMode,
    function: &F,
    enable: bool,
) -> std::result::Result<(), PciIoError> {
    match mode {
        IntrMode::Msix { vectors } => {
            let Some(table) = function.msix_table() else {
                // Mode is MSI-X but the table window is gone; nothing to mask against.
                warn!("MSI-X mode active but no vector table is mapped");
                return Ok(());
            };
            for state in vectors.iter_mut() {
                let desired = if enable {
                    state.control & !MSIX_ENTRY_CTRL_MASKBIT
                } else {
                    state.control | MSIX_ENTRY_CTRL_MASKBIT
                };
                if desired == state.control {
                    continue;
                }
                let offset = u64::from(state.entry) * MSIX_ENTRY_SIZE + MSIX_ENTRY_VECTOR_CTRL;
                table.write32(offset, desired);
                // Posted-write flush: the write may sit in a bridge buffer until the
                // read below forces it to complete. Only then is the mirror updated.
                table.read32(0);
                state.control = desired;
            }
            Ok(())
        }
        IntrMode::Legacy => {
            let dword = function.config_read32(PCI_COMMAND)?;
            let old = dword as u16;
            let new = if enable {
                old & !PCI_COMMAND_INTX_DISABLE
            } else {
                old | PCI_COMMAND_INTX_DISABLE
            };
            if new != old {
                function.config_write16(PCI_COMMAND, new)?;
            }
            Ok(())
        }
        // No masking protocol defined for single-message MSI; reserved.
        IntrMode::Msi => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{select_mode, set_mask, IntrMode, IntrModeKind, PreferredMode};
    use ruio_platform::pci::{
        MSIX_ENTRY_CTRL_MASKBIT, MSIX_ENTRY_DATA, MSIX_ENTRY_LOWER_ADDR, MSIX_ENTRY_UPPER_ADDR,
    };
    use ruio_platform::sim::{FaultPlan, SimFunctionConfig, SimPciFunction};
    use ruio_platform::PciFunction;

    #[test]
    fn msix_preferred_and_available_selects_msix_with_one_vector() {
        let function = SimPciFunction::new(SimFunctionConfig::default());
        let mode = select_mode(&*function, PreferredMode::Msix);
        match &mode {
            IntrMode::Msix { vectors } => {
                assert_eq!(vectors.len(), 1);
                assert_eq!(vectors[0].entry, 0);
                assert!(!vectors[0].masked());
            }
            other => panic!("expected MSI-X, got {other:?}"),
        }
    }

    #[test]
    fn msix_failure_falls_back_to_legacy_and_releases_allocation() {
        let function = SimPciFunction::new(SimFunctionConfig {
            faults: FaultPlan {
                msix: true,
                ..Default::default()
            },
            ..Default::default()
        });
        let mode = select_mode(&*function, PreferredMode::Msix);
        assert_eq!(mode.kind(), IntrModeKind::Legacy);
        assert!(!function.outstanding().msix_enabled);
    }

    #[test]
    fn legacy_preference_never_touches_msix() {
        let function = SimPciFunction::new(SimFunctionConfig::default());
        let mode = select_mode(&*function, PreferredMode::Legacy);
        assert_eq!(mode.kind(), IntrModeKind::Legacy);
        assert!(!function.outstanding().msix_enabled);
    }

    #[test]
    fn msix_mask_skips_hardware_when_mirror_matches() {
        let function = SimPciFunction::new(SimFunctionConfig::default());
        let mut mode = select_mode(&*function, PreferredMode::Msix);

        set_mask(&mut mode, &*function, false).unwrap();
        assert_eq!(function.table_write_count(), 1);
        assert!(function.vector_masked(0));

        // Same desired state again: the mirror suppresses the second write.
        set_mask(&mut mode, &*function, false).unwrap();
        assert_eq!(function.table_write_count(), 1);
    }

    #[test]
    fn msix_mask_flushes_every_posted_write() {
        let function = SimPciFunction::new(SimFunctionConfig::default());
        let mut mode = select_mode(&*function, PreferredMode::Msix);

        set_mask(&mut mode, &*function, false).unwrap();
        set_mask(&mut mode, &*function, true).unwrap();
        assert_eq!(function.table_write_count(), 2);
        assert_eq!(function.table_read_count(), 2, "one flush read per write");
    }

    #[test]
    fn msix_round_trip_restores_vector_control_word() {
        let function = SimPciFunction::new(SimFunctionConfig::default());
        let mut mode = select_mode(&*function, PreferredMode::Msix);
        let before = function.vector_control(0);

        set_mask(&mut mode, &*function, false).unwrap();
        assert_eq!(
            function.vector_control(0),
            before | MSIX_ENTRY_CTRL_MASKBIT
        );
        set_mask(&mut mode, &*function, true).unwrap();
        assert_eq!(function.vector_control(0), before);
    }

    #[test]
    fn msix_mask_leaves_message_address_and_data_untouched() {
        let function = SimPciFunction::new(SimFunctionConfig::default());
        let mut mode = select_mode(&*function, PreferredMode::Msix);

        let table = function.msix_table().unwrap();
        table.write32(MSIX_ENTRY_LOWER_ADDR, 0xfee0_0000);
        table.write32(MSIX_ENTRY_UPPER_ADDR, 0);
        table.write32(MSIX_ENTRY_DATA, 0x41);

        set_mask(&mut mode, &*function, false).unwrap();
        set_mask(&mut mode, &*function, true).unwrap();

        assert_eq!(table.read32(MSIX_ENTRY_LOWER_ADDR), 0xfee0_0000);
        assert_eq!(table.read32(MSIX_ENTRY_UPPER_ADDR), 0);
        assert_eq!(table.read32(MSIX_ENTRY_DATA), 0x41);
    }

    #[test]
    fn legacy_mask_toggles_only_the_intx_disable_bit() {
        let function = SimPciFunction::new(SimFunctionConfig {
            msix_vectors: 0,
            ..Default::default()
        });
        function.set_bus_master(true);
        let mut mode = IntrMode::Legacy;
        let before = function.command();

        set_mask(&mut mode, &*function, false).unwrap();
        assert!(function.intx_disabled());
        set_mask(&mut mode, &*function, true).unwrap();
        assert_eq!(function.command(), before, "round trip restores the register");
    }

    #[test]
    fn legacy_mask_elides_redundant_config_writes() {
        let function = SimPciFunction::new(SimFunctionConfig {
            msix_vectors: 0,
            ..Default::default()
        });
        let mut mode = IntrMode::Legacy;

        set_mask(&mut mode, &*function, true).unwrap();
        assert_eq!(
            function.config_write_count(),
            0,
            "already unmasked, nothing to write"
        );
        set_mask(&mut mode, &*function, false).unwrap();
        set_mask(&mut mode, &*function, false).unwrap();
        assert_eq!(function.config_write_count(), 1);
    }

    #[test]
    fn legacy_mask_surfaces_transient_config_errors() {
        let function = SimPciFunction::new(SimFunctionConfig {
            msix_vectors: 0,
            ..Default::default()
        });
        let mut mode = IntrMode::Legacy;
        function.set_faults(FaultPlan {
            config_io: true,
            ..Default::default()
        });
        assert!(set_mask(&mut mode, &*function, false).is_err());

        // The fault clears and the device keeps working.
        function.set_faults(FaultPlan::default());
        set_mask(&mut mode, &*function, false).unwrap();
        assert!(function.intx_disabled());
    }

    #[test]
    fn msi_mask_is_a_no_op() {
        let function = SimPciFunction::new(SimFunctionConfig::default());
        let mut mode = IntrMode::Msi;
        set_mask(&mut mode, &*function, false).unwrap();
        assert_eq!(function.config_write_count(), 0);
        assert_eq!(function.table_write_count(), 0);
    }
}
