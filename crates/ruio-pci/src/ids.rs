//! Static device claim table.
//!
//! Data, not logic: each entry is one (vendor, device) pair the driver binds to,
//! taken from the Intel 1 GbE controller catalog.

use ruio_platform::PciVendorDeviceId;

pub const PCI_VENDOR_ID_INTEL: u16 = 0x8086;

const fn intel(device_id: u16) -> PciVendorDeviceId {
    PciVendorDeviceId::new(PCI_VENDOR_ID_INTEL, device_id)
}

/// 82575/82576/82580/I350-family 1 GbE controllers.
pub const IGB_DEVICE_IDS: &[PciVendorDeviceId] = &[
    // 82575
    intel(0x10a7),
    intel(0x10a9),
    intel(0x10d6),
    // 82576
    intel(0x10c9),
    intel(0x10e6),
    intel(0x10e7),
    intel(0x10e8),
    intel(0x1526),
    intel(0x150a),
    intel(0x1518),
    intel(0x150d),
    // 82580
    intel(0x150e),
    intel(0x150f),
    intel(0x1510),
    intel(0x1511),
    intel(0x1516),
    intel(0x1527),
    // I350
    intel(0x1521),
    intel(0x1522),
    intel(0x1523),
    intel(0x1524),
];
