//! Device memory region lifecycle.
//!
//! A fixed, small table of mapped regions: one slot per usable BAR plus a spare for
//! late discovery. A slot is either fully mapped (name, physical range, and window all
//! present) or empty; no partial state is ever observable. One release routine serves
//! both the attach failure-unwind path and normal detach, which is what makes the two
//! paths share behavior.

use ruio_platform::{MmioWindow, PciFunction};

use crate::error::AttachError;

/// Maximum number of mappable region slots exposed to user space.
pub const MAX_MAPS: usize = 5;

/// One fully mapped device memory region.
#[derive(Debug, Clone)]
pub struct MappedRegion {
    pub name: &'static str,
    pub phys: u64,
    pub len: u64,
    pub window: MmioWindow,
}

/// Copyable description of a mapped region, without the window handle.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RegionInfo {
    pub name: &'static str,
    pub phys: u64,
    pub len: u64,
}

impl MappedRegion {
    pub fn info(&self) -> RegionInfo {
        RegionInfo {
            name: self.name,
            phys: self.phys,
            len: self.len,
        }
    }
}

pub type RegionTable = [Option<MappedRegion>; MAX_MAPS];

pub fn empty_table() -> RegionTable {
    Default::default()
}

/// Maps BAR `bar` into slot `slot` of the region table.
///
/// Fails with [`AttachError::InvalidResource`] when the BAR reads back absent (no base
/// or no length) and [`AttachError::MapFailed`] when the mapping primitive cannot
/// satisfy the request. The slot is only written on full success.
pub fn map_region<F: PciFunction>(
    function: &F,
    table: &mut RegionTable,
    slot: usize,
    bar: u8,
    name: &'static str,
) -> Result<(), AttachError> {
    assert!(slot < MAX_MAPS);

    let range = function
        .bar(bar)
        .filter(|range| range.is_present())
        .ok_or(AttachError::InvalidResource { bar })?;
    let window = function
        .map_bar(bar)
        .map_err(|_| AttachError::MapFailed { bar })?;

    table[slot] = Some(MappedRegion {
        name,
        phys: range.base,
        len: range.len,
        window,
    });
    Ok(())
}

/// Unmaps every populated slot, leaving the table empty.
///
/// Safe on a partially populated table (it iterates all slots and skips empty ones),
/// so a failed attach and a normal detach both come through here.
pub fn release_all<F: PciFunction>(function: &F, table: &mut RegionTable) {
    for slot in table.iter_mut() {
        if let Some(region) = slot.take() {
            function.unmap(region.window);
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{empty_table, map_region, release_all};
    use crate::error::AttachError;
    use ruio_platform::sim::{FaultPlan, SimFunctionConfig, SimPciFunction};
    use ruio_platform::BarRange;

    #[test]
    fn absent_bar_is_invalid_resource() {
        let function = SimPciFunction::new(SimFunctionConfig::default());
        let mut table = empty_table();
        assert_eq!(
            map_region(&*function, &mut table, 1, 1, "io"),
            Err(AttachError::InvalidResource { bar: 1 })
        );
        assert!(table[1].is_none());
    }

    #[test]
    fn zero_length_bar_is_invalid_resource() {
        let mut cfg = SimFunctionConfig::default();
        cfg.bars[2] = Some(BarRange { base: 0xd000_0000, len: 0 });
        let function = SimPciFunction::new(cfg);
        let mut table = empty_table();
        assert_eq!(
            map_region(&*function, &mut table, 2, 2, "mmio"),
            Err(AttachError::InvalidResource { bar: 2 })
        );
    }

    #[test]
    fn map_failure_leaves_slot_empty() {
        let mut faults = FaultPlan::default();
        faults.map_bar[0] = true;
        let function = SimPciFunction::new(SimFunctionConfig {
            faults,
            ..Default::default()
        });
        let mut table = empty_table();
        assert_eq!(
            map_region(&*function, &mut table, 0, 0, "config"),
            Err(AttachError::MapFailed { bar: 0 })
        );
        assert!(table[0].is_none());
        assert_eq!(function.outstanding().mappings, 0);
    }

    #[test]
    fn release_all_skips_empty_slots_and_empties_the_table() {
        let function = SimPciFunction::new(SimFunctionConfig::default());
        let mut table = empty_table();
        map_region(&*function, &mut table, 0, 0, "config").unwrap();
        assert_eq!(function.outstanding().mappings, 1);

        release_all(&*function, &mut table);
        assert_eq!(function.outstanding().mappings, 0);
        assert!(table.iter().all(Option::is_none));

        // A second pass over the now-empty table is a no-op.
        release_all(&*function, &mut table);
        assert_eq!(function.outstanding().mappings, 0);
    }
}
